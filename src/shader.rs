//! Compute shader generation for field update rules.
//!
//! Every field gets its own compute shader: a fixed prelude binding the step
//! uniforms and the field's buffers, one `read_<name>` accessor per declared
//! dependency, the rule's own WGSL, and a `main` entry point that runs
//! `update` once per texel.
//!
//! Bindings (group 0):
//! - 0: step uniforms
//! - 1: the field's current buffer (`previous_field`)
//! - 2: the field's default snapshot (`default_field`)
//! - 3: the field's next buffer (`next_field`, write-only storage)
//! - 4..: current buffers of other fields the rule reads, in declaration order

use crate::backend::FieldProgram;
use crate::uniforms::WGSL_UNIFORMS;

/// Compute workgroup edge. Dispatches cover `ceil(w / 8) x ceil(h / 8)` groups.
pub const WORKGROUP_SIZE: u32 = 8;

/// First binding index used for dependency inputs.
pub(crate) const FIRST_INPUT_BINDING: u32 = 4;

/// Build the complete compute shader for one field.
pub fn field_shader(program: &FieldProgram<'_>) -> String {
    let mut bindings = String::new();
    let mut accessors = String::new();
    let mut next_binding = FIRST_INPUT_BINDING;

    for input in &program.inputs {
        let texture = if input.field == program.field {
            "previous_field".to_string()
        } else {
            let name = format!("input_{}", input.field.index());
            bindings.push_str(&format!(
                "@group(0) @binding({next_binding})\nvar {name}: texture_2d<f32>;\n"
            ));
            next_binding += 1;
            name
        };
        accessors.push_str(&format!(
            r#"
fn read_{ident}(uv: vec2<f32>) -> vec4<f32> {{
    return textureLoad({texture}, wrap_texel(uv, textureDimensions({texture})), 0);
}}
"#,
            ident = input.config.wgsl_ident(),
        ));
    }

    format!(
        r#"// Field: {field}, rule: {rule}
{uniforms}
@group(0) @binding(0)
var<uniform> uniforms: StepUniforms;
@group(0) @binding(1)
var previous_field: texture_2d<f32>;
@group(0) @binding(2)
var default_field: texture_2d<f32>;
@group(0) @binding(3)
var next_field: texture_storage_2d<rgba32float, write>;
{bindings}
fn wrap_texel(uv: vec2<f32>, size: vec2<u32>) -> vec2<i32> {{
    let wrapped = fract(uv);
    let texel = min(vec2<u32>(floor(wrapped * vec2<f32>(size))), size - vec2<u32>(1u));
    return vec2<i32>(texel);
}}
{accessors}
// ---- update rule ----
{rule_code}
// ---------------------

@compute @workgroup_size({wg}, {wg})
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let size = textureDimensions(next_field);
    if (global_id.x >= size.x || global_id.y >= size.y) {{
        return;
    }}

    let coord = global_id.xy;
    let uv = (vec2<f32>(coord) + vec2<f32>(0.5)) / vec2<f32>(size);
    let previous = textureLoad(previous_field, vec2<i32>(coord), 0);
    let default_value = textureLoad(default_field, vec2<i32>(coord), 0);

    textureStore(next_field, vec2<i32>(coord), update(coord, uv, previous, default_value));
}}
"#,
        field = program.config.name,
        rule = program.rule.name(),
        uniforms = WGSL_UNIFORMS,
        rule_code = program.rule.wgsl(),
        wg = WORKGROUP_SIZE,
    )
}

/// Number of workgroups needed to cover `size` texels along one axis.
pub fn workgroup_count(size: u32) -> u32 {
    size.div_ceil(WORKGROUP_SIZE)
}
