/// Built-in raymarching program. Uniform layout matches `RaymarchUniform`.
pub(crate) const RAYMARCH_SHADER: &str = r#"
const PI: f32 = 3.14159265;
const SHADOW_STEPS: i32 = 256;
const GROUND_COLOR: vec3<f32> = vec3<f32>(0.55, 0.55, 0.6);
const SHAPE_COLOR: vec3<f32> = vec3<f32>(0.9, 0.45, 0.2);

struct Raymarch {
    cam_frustum: mat4x4<f32>,
    cam_to_world: mat4x4<f32>,
    cam_world_space: vec4<f32>,
    light_direction: vec4<f32>,
    light_color: vec4<f32>,
    sphere1: vec4<f32>,
    shadow_distance: vec4<f32>,
    light_intensity: f32,
    max_distance: f32,
    sphere_smooth: f32,
    degree_rotate: f32,
    shadow_intensity: f32,
    shadow_penumbra: f32,
    accuracy: f32,
    ao_step_size: f32,
    ao_intensity: f32,
    reflection_intensity: f32,
    env_reflection_intensity: f32,
    has_environment: f32,
    max_iterations: i32,
    ao_iterations: i32,
    reflection_count: i32,
    _pad: i32,
}

@group(0) @binding(0)
var<uniform> params: Raymarch;
@group(0) @binding(1)
var main_tex: texture_2d<f32>;
@group(0) @binding(2)
var reflection_cube: texture_2d<f32>;
@group(0) @binding(3)
var linear_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) ray: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip = vec4<f32>(input.position.xy, 0.0, 1.0);
    out.uv = input.uv;
    var rows = transpose(params.cam_frustum);
    out.ray = rows[i32(input.position.z)].xyz;
    return out;
}

fn sd_box(p: vec3<f32>, b: vec3<f32>) -> f32 {
    let q = abs(p) - b;
    return length(max(q, vec3<f32>(0.0))) + min(max(q.x, max(q.y, q.z)), 0.0);
}

fn smooth_union(a: f32, b: f32, k: f32) -> f32 {
    if (k <= 0.0) {
        return min(a, b);
    }
    let h = clamp(0.5 + 0.5 * (b - a) / k, 0.0, 1.0);
    return mix(b, a, h) - k * h * (1.0 - h);
}

fn rotate_y(p: vec3<f32>, degrees: f32) -> vec3<f32> {
    let a = radians(degrees);
    let c = cos(a);
    let s = sin(a);
    return vec3<f32>(c * p.x - s * p.z, p.y, s * p.x + c * p.z);
}

fn shape_distance(p: vec3<f32>) -> f32 {
    let local = p - params.sphere1.xyz;
    let r = params.sphere1.w;
    let sphere = length(local) - r;
    let boxed = sd_box(rotate_y(local, params.degree_rotate), vec3<f32>(r * 0.9, r * 0.45, r * 0.9));
    return smooth_union(sphere, boxed, params.sphere_smooth);
}

fn distance_field(p: vec3<f32>) -> f32 {
    return min(p.y, shape_distance(p));
}

fn get_normal(p: vec3<f32>) -> vec3<f32> {
    let e = vec2<f32>(0.001, 0.0);
    let n = vec3<f32>(
        distance_field(p + e.xyy) - distance_field(p - e.xyy),
        distance_field(p + e.yxy) - distance_field(p - e.yxy),
        distance_field(p + e.yyx) - distance_field(p - e.yyx),
    );
    return normalize(n);
}

// Hit distance, or -1 on a miss.
fn march(origin: vec3<f32>, dir: vec3<f32>) -> f32 {
    var t = 0.0;
    for (var i = 0; i < params.max_iterations; i = i + 1) {
        if (t >= params.max_distance) {
            return -1.0;
        }
        let d = distance_field(origin + dir * t);
        if (d < params.accuracy) {
            return t;
        }
        t = t + d;
    }
    return -1.0;
}

fn soft_shadow(origin: vec3<f32>, dir: vec3<f32>) -> f32 {
    var result = 1.0;
    var t = params.shadow_distance.x;
    for (var i = 0; i < SHADOW_STEPS; i = i + 1) {
        if (t >= params.shadow_distance.y) {
            break;
        }
        let h = distance_field(origin + dir * t);
        if (h < 0.001) {
            return 0.0;
        }
        result = min(result, params.shadow_penumbra * h / t);
        t = t + h;
    }
    return result;
}

fn ambient_occlusion(p: vec3<f32>, n: vec3<f32>) -> f32 {
    var occlusion = 0.0;
    for (var i = 1; i <= params.ao_iterations; i = i + 1) {
        let dist = params.ao_step_size * f32(i);
        occlusion = occlusion + max((dist - distance_field(p + n * dist)) / dist, 0.0);
    }
    return max(1.0 - occlusion * params.ao_intensity, 0.0);
}

fn albedo(p: vec3<f32>) -> vec3<f32> {
    if (p.y <= shape_distance(p)) {
        return GROUND_COLOR;
    }
    return SHAPE_COLOR;
}

fn shade_hit(p: vec3<f32>, n: vec3<f32>) -> vec3<f32> {
    let to_light = -normalize(params.light_direction.xyz);
    let diffuse = max(dot(n, to_light), 0.0);
    let light = params.light_color.rgb * diffuse * params.light_intensity;
    var shadow = soft_shadow(p + n * params.accuracy, to_light) * 0.5 + 0.5;
    shadow = pow(max(shadow, 0.0), params.shadow_intensity);
    let ao = ambient_occlusion(p, n);
    return albedo(p) * (light * shadow * ao + vec3<f32>(0.05) * ao);
}

fn environment(dir: vec3<f32>) -> vec3<f32> {
    if (params.has_environment < 0.5) {
        return vec3<f32>(0.0);
    }
    let d = normalize(dir);
    let u = atan2(d.z, d.x) / (2.0 * PI) + 0.5;
    let v = acos(clamp(d.y, -1.0, 1.0)) / PI;
    return textureSampleLevel(reflection_cube, linear_sampler, vec2<f32>(u, v), 0.0).rgb;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let background = textureSample(main_tex, linear_sampler, vec2<f32>(input.uv.x, 1.0 - input.uv.y));
    let dir = normalize((params.cam_to_world * vec4<f32>(input.ray, 0.0)).xyz);
    let origin = params.cam_world_space.xyz;

    let t = march(origin, dir);
    if (t < 0.0) {
        return background;
    }

    var p = origin + dir * t;
    var n = get_normal(p);
    var color = shade_hit(p, n);

    var ray = dir;
    var weight = params.reflection_intensity;
    for (var i = 0; i < params.reflection_count; i = i + 1) {
        ray = reflect(ray, n);
        let start = p + n * (params.accuracy * 2.0);
        let hit = march(start, ray);
        if (hit < 0.0) {
            color = color + environment(ray) * weight * params.env_reflection_intensity;
            break;
        }
        p = start + ray * hit;
        n = get_normal(p);
        color = color + shade_hit(p, n) * weight;
        weight = weight * params.reflection_intensity;
    }
    return vec4<f32>(color, 1.0);
}
"#;

/// Pass-through copy used when no raymarch material is available.
pub(crate) const BLIT_SHADER: &str = r#"
@group(0) @binding(0)
var source_tex: texture_2d<f32>;
@group(0) @binding(1)
var source_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    out.clip = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(source_tex, source_sampler, input.uv);
}
"#;
