//! WGSL declaration scanner.
//!
//! Finds the names a renderer binds by: uniforms, textures/samplers and
//! vertex attributes. This is a token scan, not a compiler; it only looks at
//! module-scope declarations and the signature of the entry points. Function
//! bodies are skipped by brace matching.
//!
//! Binding conventions the renderer relies on (violations are errors):
//! - `var<uniform>` declarations live in group 0, one buffer per uniform;
//! - textures and samplers live in group 1, texture unit `u` at binding
//!   `2u` and its sampler at binding `2u + 1`.

use std::collections::HashMap;
use std::fmt;

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;

/// A scan error in WGSL source.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectError {
    pub message: String,
    /// 1-based source line number.
    pub line: usize,
    /// 1-based source column number.
    pub col: usize,
}

impl ReflectError {
    pub(crate) fn new(msg: impl Into<String>, line: usize, col: usize) -> Self {
        Self { message: msg.into(), line, col }
    }

    fn at(msg: impl Into<String>, tok: &Token<'_>) -> Self {
        Self::new(msg, tok.line, tok.col)
    }
}

impl fmt::Display for ReflectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wgsl scan error at {}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for ReflectError {}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn visibility(self) -> wgpu::ShaderStages {
        match self {
            ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
            ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
        }
    }

    fn entry_attr(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_attr())
    }
}

// ── uniform types ─────────────────────────────────────────────────────────

/// Element type of a uniform (scalar, vector or matrix).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UniformElem {
    I32,
    U32,
    F32,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformElem {
    /// Size in bytes in the uniform address space.
    pub fn size(self) -> u64 {
        match self {
            UniformElem::I32 | UniformElem::U32 | UniformElem::F32 => 4,
            UniformElem::Vec2 => 8,
            UniformElem::Vec3 => 12,
            UniformElem::Vec4 => 16,
            UniformElem::Mat4 => 64,
        }
    }

    /// Number of 32-bit components.
    pub fn components(self) -> usize {
        (self.size() / 4) as usize
    }

    fn parse(ty: &str) -> Option<Self> {
        Some(match ty {
            "i32" => UniformElem::I32,
            "u32" => UniformElem::U32,
            "f32" => UniformElem::F32,
            "vec2<f32>" | "vec2f" => UniformElem::Vec2,
            "vec3<f32>" | "vec3f" => UniformElem::Vec3,
            "vec4<f32>" | "vec4f" => UniformElem::Vec4,
            "mat4x4<f32>" | "mat4x4f" => UniformElem::Mat4,
            _ => return None,
        })
    }
}

impl fmt::Display for UniformElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UniformElem::I32 => "i32",
            UniformElem::U32 => "u32",
            UniformElem::F32 => "f32",
            UniformElem::Vec2 => "vec2<f32>",
            UniformElem::Vec3 => "vec3<f32>",
            UniformElem::Vec4 => "vec4<f32>",
            UniformElem::Mat4 => "mat4x4<f32>",
        })
    }
}

/// Declared type of a uniform: an element, optionally a fixed-size array of it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UniformType {
    pub elem: UniformElem,
    pub array_len: Option<u32>,
}

impl UniformType {
    pub fn scalar(elem: UniformElem) -> Self {
        Self { elem, array_len: None }
    }

    pub fn array(elem: UniformElem, len: u32) -> Self {
        Self { elem, array_len: Some(len) }
    }

    /// Number of elements (1 for non-arrays).
    pub fn count(&self) -> u32 {
        self.array_len.unwrap_or(1)
    }

    /// Distance between consecutive elements. Uniform arrays use a 16-byte stride.
    pub fn stride(&self) -> u64 {
        match self.array_len {
            Some(_) => self.elem.size().next_multiple_of(16),
            None => self.elem.size(),
        }
    }

    /// Bytes the shader reads.
    pub fn byte_size(&self) -> u64 {
        self.stride() * u64::from(self.count())
    }

    fn parse(ty: &str) -> Option<Self> {
        if let Some(inner) = ty.strip_prefix("array<").and_then(|t| t.strip_suffix('>')) {
            let (elem, len) = inner.rsplit_once(',')?;
            let len = parse_int(len)?;
            if len == 0 {
                return None;
            }
            return Some(Self::array(UniformElem::parse(elem)?, len));
        }
        UniformElem::parse(ty).map(Self::scalar)
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.array_len {
            Some(n) => write!(f, "array<{}, {}>", self.elem, n),
            None => write!(f, "{}", self.elem),
        }
    }
}

// ── declarations ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub ty: UniformType,
    pub(crate) pos: (usize, usize),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResourceKind {
    Texture,
    Sampler,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Texture => "texture",
            ResourceKind::Sampler => "sampler",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    pub(crate) pos: (usize, usize),
}

impl ResourceDecl {
    /// Texture unit this texture or sampler belongs to.
    pub fn unit(&self) -> u32 {
        self.binding / 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    pub name: String,
    pub location: u32,
    pub format: wgpu::VertexFormat,
}

/// Declarations found in one stage's source.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReflection {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub uniforms: Vec<UniformDecl>,
    pub resources: Vec<ResourceDecl>,
    /// Vertex inputs; always empty for the fragment stage.
    pub attributes: Vec<AttributeDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformBinding {
    pub decl: UniformDecl,
    pub visibility: wgpu::ShaderStages,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBinding {
    pub decl: ResourceDecl,
    pub visibility: wgpu::ShaderStages,
}

/// Declarations of a vertex + fragment pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderReflection {
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub uniforms: Vec<UniformBinding>,
    pub resources: Vec<ResourceBinding>,
    pub attributes: Vec<AttributeDecl>,
}

impl ShaderReflection {
    /// Merges the declarations of both stages.
    ///
    /// A name declared in both stages must agree on binding and type; it is then
    /// visible to both. Two different names on one binding is an error.
    pub fn merge(vs: StageReflection, fs: StageReflection) -> Result<Self, ReflectError> {
        let mut uniforms: Vec<UniformBinding> = vs
            .uniforms
            .into_iter()
            .map(|decl| UniformBinding { decl, visibility: wgpu::ShaderStages::VERTEX })
            .collect();

        for decl in fs.uniforms {
            if let Some(existing) = uniforms.iter_mut().find(|u| u.decl.name == decl.name) {
                if existing.decl.binding != decl.binding || existing.decl.ty != decl.ty {
                    return Err(ReflectError::new(
                        format!(
                            "uniform `{}` is declared as {} @binding({}) in the vertex stage but {} @binding({}) in the fragment stage",
                            decl.name, existing.decl.ty, existing.decl.binding, decl.ty, decl.binding
                        ),
                        decl.pos.0,
                        decl.pos.1,
                    ));
                }
                existing.visibility |= wgpu::ShaderStages::FRAGMENT;
                continue;
            }
            if let Some(other) = uniforms.iter().find(|u| u.decl.binding == decl.binding) {
                return Err(binding_clash(&other.decl.name, &decl.name, decl.group, decl.binding, decl.pos));
            }
            uniforms.push(UniformBinding { decl, visibility: wgpu::ShaderStages::FRAGMENT });
        }

        let mut resources: Vec<ResourceBinding> = vs
            .resources
            .into_iter()
            .map(|decl| ResourceBinding { decl, visibility: wgpu::ShaderStages::VERTEX })
            .collect();

        for decl in fs.resources {
            if let Some(existing) = resources.iter_mut().find(|r| r.decl.name == decl.name) {
                if existing.decl.binding != decl.binding || existing.decl.kind != decl.kind {
                    return Err(ReflectError::new(
                        format!(
                            "`{}` is declared as a {} @binding({}) in the vertex stage but a {} @binding({}) in the fragment stage",
                            decl.name, existing.decl.kind, existing.decl.binding, decl.kind, decl.binding
                        ),
                        decl.pos.0,
                        decl.pos.1,
                    ));
                }
                existing.visibility |= wgpu::ShaderStages::FRAGMENT;
                continue;
            }
            if let Some(other) = resources.iter().find(|r| r.decl.binding == decl.binding) {
                return Err(binding_clash(&other.decl.name, &decl.name, decl.group, decl.binding, decl.pos));
            }
            resources.push(ResourceBinding { decl, visibility: wgpu::ShaderStages::FRAGMENT });
        }

        uniforms.sort_by_key(|u| u.decl.binding);
        resources.sort_by_key(|r| r.decl.binding);

        Ok(Self {
            vertex_entry: vs.entry_point,
            fragment_entry: fs.entry_point,
            uniforms,
            resources,
            attributes: vs.attributes,
        })
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformBinding> {
        self.uniforms.iter().find(|u| u.decl.name == name)
    }

    /// Texture units sampled by the pair, ascending.
    pub fn texture_units(&self) -> Vec<u32> {
        let mut units: Vec<u32> = self
            .resources
            .iter()
            .filter(|r| r.decl.kind == ResourceKind::Texture)
            .map(|r| r.decl.unit())
            .collect();
        units.dedup();
        units
    }
}

fn binding_clash(a: &str, b: &str, group: u32, binding: u32, pos: (usize, usize)) -> ReflectError {
    ReflectError::new(
        format!("`{a}` and `{b}` share @group({group}) @binding({binding})"),
        pos.0,
        pos.1,
    )
}

/// Scans the source of one stage.
pub fn reflect_stage(source: &str, stage: ShaderStage) -> Result<StageReflection, ReflectError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ReflectError::new("empty shader source", 1, 1));
    }

    let mut scan = Scan::default();
    let mut p = Parser::new(tokens, source);
    p.collect_names()?;
    while !p.at_end() {
        scan.item(&mut p)?;
    }

    let entry_attr = stage.entry_attr();
    let mut entries = scan.functions.iter().filter(|f| f.stage_attr == Some(entry_attr));
    let entry = entries
        .next()
        .ok_or_else(|| ReflectError::new(format!("no @{entry_attr} entry point"), 1, 1))?;
    if let Some(second) = entries.next() {
        return Err(ReflectError::new(
            format!("more than one @{entry_attr} entry point (`{}` and `{}`)", entry.name, second.name),
            second.pos.0,
            second.pos.1,
        ));
    }

    let attributes = match stage {
        ShaderStage::Vertex => vertex_attributes(&entry.params, &scan.structs)?,
        ShaderStage::Fragment => Vec::new(),
    };

    Ok(StageReflection {
        stage,
        entry_point: entry.name.clone(),
        uniforms: scan.uniforms,
        resources: scan.resources,
        attributes,
    })
}

/// Scans both stages and merges them.
pub fn reflect(vs_source: &str, fs_source: &str) -> Result<ShaderReflection, ReflectError> {
    let vs = reflect_stage(vs_source, ShaderStage::Vertex)?;
    let fs = reflect_stage(fs_source, ShaderStage::Fragment)?;
    ShaderReflection::merge(vs, fs)
}

/// Like [`reflect`], and also checks each stage against the module naga
/// built from the same source.
pub fn reflect_modules(
    vs_source: &str,
    vs_module: &naga::Module,
    fs_source: &str,
    fs_module: &naga::Module,
) -> Result<ShaderReflection, ReflectError> {
    let vs = reflect_stage(vs_source, ShaderStage::Vertex)?;
    check_module(&vs, vs_module, vs_source)?;
    let fs = reflect_stage(fs_source, ShaderStage::Fragment)?;
    check_module(&fs, fs_module, fs_source)?;
    ShaderReflection::merge(vs, fs)
}

/// Every bound global in `module` must have been scanned under the same name
/// at the same group and binding, and every scanned declaration must be bound
/// in `module`.
pub fn check_module(stage: &StageReflection, module: &naga::Module, source: &str) -> Result<(), ReflectError> {
    let scanned: Vec<(&str, u32, u32, (usize, usize))> = stage
        .uniforms
        .iter()
        .map(|u| (u.name.as_str(), u.group, u.binding, u.pos))
        .chain(stage.resources.iter().map(|r| (r.name.as_str(), r.group, r.binding, r.pos)))
        .collect();

    let mut bound = Vec::new();
    for (handle, var) in module.global_variables.iter() {
        let (Some(name), Some(rb)) = (var.name.as_deref(), var.binding.as_ref()) else {
            continue;
        };
        bound.push(name);
        match scanned.iter().find(|s| s.0 == name) {
            None => {
                let loc = module.global_variables.get_span(handle).location(source);
                return Err(ReflectError::new(
                    format!(
                        "`{name}` at @group({}) @binding({}) was not found by the declaration scan",
                        rb.group, rb.binding
                    ),
                    loc.line_number as usize,
                    loc.line_position as usize,
                ));
            }
            Some(&(_, group, binding, pos)) if (group, binding) != (rb.group, rb.binding) => {
                return Err(ReflectError::new(
                    format!(
                        "`{name}` was scanned at @group({group}) @binding({binding}) but compiles to @group({}) @binding({})",
                        rb.group, rb.binding
                    ),
                    pos.0,
                    pos.1,
                ));
            }
            Some(_) => {}
        }
    }

    if let Some(&(name, _, _, pos)) = scanned.iter().find(|s| !bound.contains(&s.0)) {
        return Err(ReflectError::new(
            format!("`{name}` was scanned but is not a bound global of the compiled module"),
            pos.0,
            pos.1,
        ));
    }
    Ok(())
}

fn vertex_attributes(
    params: &[Field],
    structs: &HashMap<String, Vec<Field>>,
) -> Result<Vec<AttributeDecl>, ReflectError> {
    let mut out: Vec<AttributeDecl> = Vec::new();
    let mut push = |field: &Field, location: u32| -> Result<(), ReflectError> {
        let format = vertex_format(&field.ty).ok_or_else(|| {
            ReflectError::new(
                format!("unsupported vertex attribute type `{}` for `{}`", field.ty, field.name),
                field.pos.0,
                field.pos.1,
            )
        })?;
        if let Some(prev) = out.iter().find(|a| a.location == location) {
            return Err(ReflectError::new(
                format!("`{}` and `{}` share @location({location})", prev.name, field.name),
                field.pos.0,
                field.pos.1,
            ));
        }
        out.push(AttributeDecl { name: field.name.clone(), location, format });
        Ok(())
    };

    for param in params {
        if param.builtin {
            continue;
        }
        if let Some(location) = param.location {
            push(param, location)?;
            continue;
        }
        let Some(fields) = structs.get(&param.ty) else {
            return Err(ReflectError::new(
                format!("vertex input `{}` has neither @location nor @builtin", param.name),
                param.pos.0,
                param.pos.1,
            ));
        };
        for field in fields.iter().filter(|f| !f.builtin) {
            let Some(location) = field.location else {
                return Err(ReflectError::new(
                    format!("vertex input field `{}` has neither @location nor @builtin", field.name),
                    field.pos.0,
                    field.pos.1,
                ));
            };
            push(field, location)?;
        }
    }

    out.sort_by_key(|a| a.location);
    Ok(out)
}

fn vertex_format(ty: &str) -> Option<wgpu::VertexFormat> {
    Some(match ty {
        "f32" => wgpu::VertexFormat::Float32,
        "vec2<f32>" | "vec2f" => wgpu::VertexFormat::Float32x2,
        "vec3<f32>" | "vec3f" => wgpu::VertexFormat::Float32x3,
        "vec4<f32>" | "vec4f" => wgpu::VertexFormat::Float32x4,
        _ => return None,
    })
}

fn parse_int(text: &str) -> Option<u32> {
    text.trim()
        .trim_end_matches(['u', 'i'])
        .parse()
        .ok()
}

// ── module-scope scan ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Field {
    name: String,
    ty: String,
    location: Option<u32>,
    builtin: bool,
    pos: (usize, usize),
}

#[derive(Debug)]
struct Function {
    name: String,
    stage_attr: Option<&'static str>,
    params: Vec<Field>,
    pos: (usize, usize),
}

#[derive(Default)]
struct Scan {
    uniforms: Vec<UniformDecl>,
    resources: Vec<ResourceDecl>,
    structs: HashMap<String, Vec<Field>>,
    functions: Vec<Function>,
}

impl Scan {
    fn item(&mut self, p: &mut Parser<'_>) -> Result<(), ReflectError> {
        let attrs = p.attributes()?;
        let Some(tok) = p.peek() else {
            return match attrs.first() {
                Some(a) => Err(ReflectError::new("attribute without a declaration", a.line, a.col)),
                None => Ok(()),
            };
        };

        match tok.text {
            "var" => self.var(p, &attrs),
            "struct" => self.structure(p),
            "fn" => self.function(p, &attrs),
            ";" => {
                p.bump();
                Ok(())
            }
            _ => p.skip_declaration(),
        }
    }

    fn var(&mut self, p: &mut Parser<'_>, attrs: &[Attr<'_>]) -> Result<(), ReflectError> {
        let var_tok = p.next()?;
        let space = if p.eat("<") {
            let space = p.ident()?.text;
            if p.eat(",") {
                p.ident()?;
            }
            p.expect(">")?;
            Some(space)
        } else {
            None
        };

        let name = p.ident()?;
        p.expect(":")?;
        let ty = p.ty()?;
        if p.peek().is_some_and(|t| t.text == "=") {
            p.skip_declaration()?;
        } else {
            p.expect(";")?;
        }

        let group = p.attr_u32(attrs, "group")?;
        let binding = p.attr_u32(attrs, "binding")?;
        let pos = (name.line, name.col);

        match space {
            Some("uniform") => {
                let (Some(group), Some(binding)) = (group, binding) else {
                    return Err(ReflectError::at(
                        format!("uniform `{}` needs @group and @binding", name.text),
                        &var_tok,
                    ));
                };
                if group != UNIFORM_GROUP {
                    return Err(ReflectError::at(
                        format!("uniform `{}` must be in @group({UNIFORM_GROUP})", name.text),
                        &name,
                    ));
                }
                let parsed = UniformType::parse(&ty).ok_or_else(|| {
                    ReflectError::at(format!("unsupported uniform type `{ty}`"), &name)
                })?;
                if let Some(prev) = self.uniforms.iter().find(|u| u.binding == binding) {
                    return Err(binding_clash(&prev.name, name.text, group, binding, pos));
                }
                self.uniforms.push(UniformDecl {
                    name: name.text.to_string(),
                    group,
                    binding,
                    ty: parsed,
                    pos,
                });
            }
            Some("private") | Some("workgroup") => {}
            Some(other) => {
                return Err(ReflectError::at(
                    format!("`var<{other}>` is not supported (`{}`)", name.text),
                    &var_tok,
                ));
            }
            None => {
                let (Some(group), Some(binding)) = (group, binding) else {
                    return Ok(());
                };
                let kind = if ty == "texture_2d<f32>" {
                    ResourceKind::Texture
                } else if ty == "sampler" {
                    ResourceKind::Sampler
                } else if ty.starts_with("texture_") {
                    return Err(ReflectError::at(
                        format!("unsupported texture type `{ty}` for `{}` (only texture_2d<f32>)", name.text),
                        &name,
                    ));
                } else {
                    return Err(ReflectError::at(
                        format!("unsupported resource type `{ty}` for `{}`", name.text),
                        &name,
                    ));
                };
                if group != TEXTURE_GROUP {
                    return Err(ReflectError::at(
                        format!("`{}` must be in @group({TEXTURE_GROUP})", name.text),
                        &name,
                    ));
                }
                let expected_parity = match kind {
                    ResourceKind::Texture => 0,
                    ResourceKind::Sampler => 1,
                };
                if binding % 2 != expected_parity {
                    let what = match kind {
                        ResourceKind::Texture => "textures use even bindings (2 * unit)",
                        ResourceKind::Sampler => "samplers use odd bindings (2 * unit + 1)",
                    };
                    return Err(ReflectError::at(
                        format!("`{}` at @binding({binding}): {what}", name.text),
                        &name,
                    ));
                }
                if let Some(prev) = self.resources.iter().find(|r| r.binding == binding) {
                    return Err(binding_clash(&prev.name, name.text, group, binding, pos));
                }
                self.resources.push(ResourceDecl {
                    name: name.text.to_string(),
                    group,
                    binding,
                    kind,
                    pos,
                });
            }
        }
        Ok(())
    }

    fn structure(&mut self, p: &mut Parser<'_>) -> Result<(), ReflectError> {
        p.next()?;
        let name = p.ident()?;
        p.expect("{")?;
        let fields = p.fields("}")?;
        self.structs.insert(name.text.to_string(), fields);
        Ok(())
    }

    fn function(&mut self, p: &mut Parser<'_>, attrs: &[Attr<'_>]) -> Result<(), ReflectError> {
        p.next()?;
        let name = p.ident()?;
        p.expect("(")?;
        let params = p.fields(")")?;
        if p.eat("->") {
            p.attributes()?;
            p.ty()?;
        }
        p.expect("{")?;
        p.skip_block()?;

        let stage_attr = attrs.iter().find_map(|a| match a.name {
            "vertex" => Some("vertex"),
            "fragment" => Some("fragment"),
            "compute" => Some("compute"),
            _ => None,
        });

        self.functions.push(Function {
            name: name.text.to_string(),
            stage_attr,
            params,
            pos: (name.line, name.col),
        });
        Ok(())
    }
}

// ── tokens ────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum TokKind {
    Ident,
    Number,
    Punct,
}

#[derive(Debug, Copy, Clone)]
struct Token<'s> {
    kind: TokKind,
    text: &'s str,
    line: usize,
    col: usize,
}

fn tokenize(src: &str) -> Result<Vec<Token<'_>>, ReflectError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let (mut i, mut line, mut col) = (0usize, 1usize, 1usize);

    while i < bytes.len() {
        let c = bytes[i];

        if c == b'\n' {
            i += 1;
            line += 1;
            col = 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let (start_line, start_col) = (line, col);
            let mut depth = 0usize;
            loop {
                match (bytes.get(i), bytes.get(i + 1)) {
                    (None, _) => {
                        return Err(ReflectError::new("unterminated block comment", start_line, start_col));
                    }
                    (Some(b'/'), Some(b'*')) => {
                        depth += 1;
                        i += 2;
                        col += 2;
                    }
                    (Some(b'*'), Some(b'/')) => {
                        depth -= 1;
                        i += 2;
                        col += 2;
                        if depth == 0 {
                            break;
                        }
                    }
                    (Some(b'\n'), _) => {
                        i += 1;
                        line += 1;
                        col = 1;
                    }
                    _ => {
                        i += 1;
                        col += 1;
                    }
                }
            }
            continue;
        }

        let start = i;
        let kind = if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            TokKind::Ident
        } else if c.is_ascii_digit() {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
            {
                i += 1;
            }
            TokKind::Number
        } else if c == b'-' && bytes.get(i + 1) == Some(&b'>') {
            i += 2;
            TokKind::Punct
        } else {
            i += src[i..].chars().next().map_or(1, char::len_utf8);
            TokKind::Punct
        };

        tokens.push(Token { kind, text: &src[start..i], line, col });
        col += src[start..i].chars().count();
    }

    Ok(tokens)
}

// ── parser ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Attr<'s> {
    name: &'s str,
    args: Vec<Token<'s>>,
    line: usize,
    col: usize,
}

struct Parser<'s> {
    tokens: Vec<Token<'s>>,
    pos: usize,
    end: (usize, usize),
    /// Module-scope integer `const`s.
    consts: HashMap<&'s str, u32>,
    /// Module-scope `alias` targets, already expanded.
    aliases: HashMap<&'s str, String>,
}

impl<'s> Parser<'s> {
    fn new(tokens: Vec<Token<'s>>, source: &str) -> Self {
        let line = source.lines().count().max(1);
        let col = source.lines().last().map_or(0, |l| l.chars().count()) + 1;
        Self {
            tokens,
            pos: 0,
            end: (line, col),
            consts: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// First pass: records module-scope integer constants and type aliases so
    /// declarations may use them before they appear. Rewinds afterwards.
    fn collect_names(&mut self) -> Result<(), ReflectError> {
        while !self.at_end() {
            self.attributes()?;
            match self.peek().map(|t| t.text) {
                None => break,
                Some("const") => {
                    self.bump();
                    let name = self.ident()?.text;
                    if self.eat(":") {
                        self.ty()?;
                    }
                    self.expect("=")?;
                    let start = self.pos;
                    self.skip_declaration()?;
                    if let Some(value) = self.eval_u32(&self.tokens[start..self.pos - 1]) {
                        self.consts.insert(name, value);
                    }
                }
                Some("alias") => {
                    self.bump();
                    let name = self.ident()?.text;
                    self.expect("=")?;
                    let target = self.ty()?;
                    self.expect(";")?;
                    self.aliases.insert(name, target);
                }
                Some(_) => self.skip_declaration()?,
            }
        }
        self.pos = 0;
        Ok(())
    }

    fn attr_u32(&self, attrs: &[Attr<'_>], name: &str) -> Result<Option<u32>, ReflectError> {
        let Some(attr) = attrs.iter().find(|a| a.name == name) else {
            return Ok(None);
        };
        let Some(first) = attr.args.first() else {
            return Err(ReflectError::new(
                format!("@{name} expects one argument"),
                attr.line,
                attr.col,
            ));
        };
        self.eval_u32(&attr.args).map(Some).ok_or_else(|| {
            ReflectError::at(format!("@{name} expects a constant integer expression"), first)
        })
    }

    /// Evaluates `+ - * / %` over integer literals, known consts and
    /// parentheses. `None` when the tokens are anything else or overflow.
    fn eval_u32(&self, tokens: &[Token<'_>]) -> Option<u32> {
        let mut pos = 0;
        let value = self.eval_sum(tokens, &mut pos)?;
        (pos == tokens.len()).then_some(value)
    }

    fn eval_sum(&self, tokens: &[Token<'_>], pos: &mut usize) -> Option<u32> {
        let mut acc = self.eval_product(tokens, pos)?;
        while let Some(op) = tokens.get(*pos).map(|t| t.text).filter(|op| matches!(*op, "+" | "-")) {
            *pos += 1;
            let rhs = self.eval_product(tokens, pos)?;
            acc = if op == "+" { acc.checked_add(rhs)? } else { acc.checked_sub(rhs)? };
        }
        Some(acc)
    }

    fn eval_product(&self, tokens: &[Token<'_>], pos: &mut usize) -> Option<u32> {
        let mut acc = self.eval_atom(tokens, pos)?;
        while let Some(op) = tokens.get(*pos).map(|t| t.text).filter(|op| matches!(*op, "*" | "/" | "%")) {
            *pos += 1;
            let rhs = self.eval_atom(tokens, pos)?;
            acc = match op {
                "*" => acc.checked_mul(rhs)?,
                "/" => acc.checked_div(rhs)?,
                _ => acc.checked_rem(rhs)?,
            };
        }
        Some(acc)
    }

    fn eval_atom(&self, tokens: &[Token<'_>], pos: &mut usize) -> Option<u32> {
        let tok = tokens.get(*pos)?;
        *pos += 1;
        match tok.kind {
            TokKind::Number => parse_int(tok.text),
            TokKind::Ident => self.consts.get(tok.text).copied(),
            TokKind::Punct if tok.text == "(" => {
                let value = self.eval_sum(tokens, pos)?;
                if tokens.get(*pos)?.text != ")" {
                    return None;
                }
                *pos += 1;
                Some(value)
            }
            TokKind::Punct => None,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<Token<'s>> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn next(&mut self) -> Result<Token<'s>, ReflectError> {
        let tok = self
            .peek()
            .ok_or_else(|| ReflectError::new("unexpected end of source", self.end.0, self.end.1))?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.peek().is_some_and(|t| t.text == text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> Result<Token<'s>, ReflectError> {
        let tok = self.next()?;
        if tok.text != text {
            return Err(ReflectError::at(format!("expected `{text}`, found `{}`", tok.text), &tok));
        }
        Ok(tok)
    }

    fn ident(&mut self) -> Result<Token<'s>, ReflectError> {
        let tok = self.next()?;
        if tok.kind != TokKind::Ident {
            return Err(ReflectError::at(format!("expected identifier, found `{}`", tok.text), &tok));
        }
        Ok(tok)
    }

    fn attributes(&mut self) -> Result<Vec<Attr<'s>>, ReflectError> {
        let mut attrs = Vec::new();
        while self.peek().is_some_and(|t| t.text == "@") {
            let at = self.next()?;
            let name = self.ident()?;
            let mut args = Vec::new();
            if self.eat("(") {
                let mut depth = 1usize;
                loop {
                    let tok = self.next()?;
                    match tok.text {
                        "(" => depth += 1,
                        ")" => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        "," if depth == 1 => continue,
                        _ => {}
                    }
                    args.push(tok);
                }
            }
            attrs.push(Attr { name: name.text, args, line: at.line, col: at.col });
        }
        Ok(attrs)
    }

    /// Reads a type expression and returns it without whitespace, e.g.
    /// `array<vec4<f32>,4>`. Aliases and integer consts are substituted.
    fn ty(&mut self) -> Result<String, ReflectError> {
        let head = self.ident()?;
        let mut text = self.expand(head);
        if self.eat("<") {
            text.push('<');
            let mut depth = 1usize;
            while depth > 0 {
                let tok = self.next()?;
                match tok.text {
                    "<" => depth += 1,
                    ">" => depth -= 1,
                    ";" | "{" => {
                        return Err(ReflectError::at("unterminated template list", &tok));
                    }
                    _ => {}
                }
                text.push_str(&self.expand(tok));
            }
        }
        Ok(text)
    }

    /// Reads `attrs name: type` entries separated by commas, up to `close`.
    fn fields(&mut self, close: &str) -> Result<Vec<Field>, ReflectError> {
        let mut fields = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(fields);
            }
            let attrs = self.attributes()?;
            let name = self.ident()?;
            self.expect(":")?;
            let ty = self.ty()?;
            fields.push(Field {
                name: name.text.to_string(),
                ty,
                location: self.attr_u32(&attrs, "location")?,
                builtin: attrs.iter().any(|a| a.name == "builtin"),
                pos: (name.line, name.col),
            });
            if !self.eat(",") {
                self.expect(close)?;
                return Ok(fields);
            }
        }
    }

    /// Skips to the `}` matching an already consumed `{`.
    fn skip_block(&mut self) -> Result<(), ReflectError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()?.text {
                "{" => depth += 1,
                "}" => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn expand(&self, tok: Token<'s>) -> String {
        if tok.kind == TokKind::Ident {
            if let Some(target) = self.aliases.get(tok.text) {
                return target.clone();
            }
            if let Some(value) = self.consts.get(tok.text) {
                return value.to_string();
            }
        }
        tok.text.to_string()
    }

    /// Skips a declaration we do not care about: up to a `;` at nesting
    /// depth zero, or through a braced block.
    fn skip_declaration(&mut self) -> Result<(), ReflectError> {
        let mut depth = 0usize;
        loop {
            let tok = self.next()?;
            match tok.text {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" => depth = depth.saturating_sub(1),
                "}" => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.eat(";");
                        return Ok(());
                    }
                }
                ";" if depth == 0 => return Ok(()),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULLTRI_VS: &str = r#"
        // Full-screen triangle.
        struct VsIn {
            @location(0) position: vec3<f32>,
            @location(1) uv: vec2<f32>,
        };

        struct VsOut {
            @builtin(position) clip: vec4<f32>,
            @location(0) uv: vec2<f32>,
        };

        @vertex
        fn vs_main(input: VsIn, @builtin(vertex_index) index: u32) -> VsOut {
            var out: VsOut;
            out.clip = vec4<f32>(input.position, 1.0);
            out.uv = input.uv;
            return out;
        }
    "#;

    const DISPLAY_FS: &str = r#"
        @group(0) @binding(0) var<uniform> invCanvasSize: vec2<f32>;
        @group(1) @binding(0) var sam: texture_2d<f32>;
        @group(1) @binding(1) var sam_sampler: sampler;

        /* block comments /* nest */ and hide @group(0) @binding(9) var<uniform> ghost: f32; */
        @fragment
        fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
            let uv = frag.xy * invCanvasSize;
            return textureSample(sam, sam_sampler, uv);
        }
    "#;

    #[test]
    fn vertex_attributes_come_from_input_struct() {
        let vs = reflect_stage(FULLTRI_VS, ShaderStage::Vertex).unwrap();
        assert_eq!(vs.entry_point, "vs_main");
        let attrs: Vec<_> = vs.attributes.iter().map(|a| (a.name.as_str(), a.location, a.format)).collect();
        assert_eq!(
            attrs,
            vec![
                ("position", 0, wgpu::VertexFormat::Float32x3),
                ("uv", 1, wgpu::VertexFormat::Float32x2),
            ]
        );
        assert!(vs.uniforms.is_empty());
    }

    #[test]
    fn attributes_declared_as_parameters() {
        let src = "@vertex fn main(@location(2) n: vec3f, @location(0) p: vec3f) -> @builtin(position) vec4f { return vec4f(p, 1.0); }";
        let vs = reflect_stage(src, ShaderStage::Vertex).unwrap();
        let names: Vec<_> = vs.attributes.iter().map(|a| (a.name.as_str(), a.location)).collect();
        assert_eq!(names, vec![("p", 0), ("n", 2)]);
    }

    #[test]
    fn fragment_uniforms_and_textures() {
        let fs = reflect_stage(DISPLAY_FS, ShaderStage::Fragment).unwrap();
        assert_eq!(fs.entry_point, "fs_main");
        assert_eq!(fs.uniforms.len(), 1);
        assert_eq!(fs.uniforms[0].name, "invCanvasSize");
        assert_eq!(fs.uniforms[0].ty, UniformType::scalar(UniformElem::Vec2));

        let res: Vec<_> = fs.resources.iter().map(|r| (r.name.as_str(), r.kind, r.unit())).collect();
        assert_eq!(
            res,
            vec![("sam", ResourceKind::Texture, 0), ("sam_sampler", ResourceKind::Sampler, 0)]
        );
    }

    #[test]
    fn array_uniforms_use_16_byte_stride() {
        let src = "@group(0) @binding(3) var<uniform> lights: array<vec3<f32>, 4>;\n@fragment fn f() {}";
        let fs = reflect_stage(src, ShaderStage::Fragment).unwrap();
        let ty = fs.uniforms[0].ty;
        assert_eq!(ty, UniformType::array(UniformElem::Vec3, 4));
        assert_eq!(ty.stride(), 16);
        assert_eq!(ty.byte_size(), 64);
        assert_eq!(UniformType::scalar(UniformElem::Mat4).byte_size(), 64);
    }

    #[test]
    fn merge_shares_uniforms_across_stages() {
        let vs_src = "@group(0) @binding(0) var<uniform> invCanvasSize: vec2f;\n@vertex fn v(@location(0) p: vec3f) -> @builtin(position) vec4f { return vec4f(p, 1.0); }";
        let merged = reflect(vs_src, DISPLAY_FS).unwrap();
        let u = merged.uniform("invCanvasSize").unwrap();
        assert_eq!(u.visibility, wgpu::ShaderStages::VERTEX_FRAGMENT);
        assert_eq!(merged.texture_units(), vec![0]);
        assert_eq!(merged.vertex_entry, "v");
        assert_eq!(merged.fragment_entry, "fs_main");
    }

    #[test]
    fn merge_rejects_conflicting_types() {
        let vs_src = "@group(0) @binding(0) var<uniform> invCanvasSize: vec4f;\n@vertex fn v() -> @builtin(position) vec4f { return invCanvasSize; }";
        let err = reflect(vs_src, DISPLAY_FS).unwrap_err();
        assert!(err.message.contains("invCanvasSize"), "{err}");
    }

    #[test]
    fn merge_rejects_two_names_on_one_binding() {
        let vs_src = "@group(0) @binding(0) var<uniform> scale: f32;\n@vertex fn v() -> @builtin(position) vec4f { return vec4f(scale); }";
        let err = reflect(vs_src, DISPLAY_FS).unwrap_err();
        assert!(err.message.contains("share"), "{err}");
    }

    #[test]
    fn empty_source_is_an_error() {
        let err = reflect_stage("  // nothing here\n", ShaderStage::Vertex).unwrap_err();
        assert_eq!(err.message, "empty shader source");
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let err = reflect_stage("fn helper() {}", ShaderStage::Fragment).unwrap_err();
        assert!(err.message.contains("@fragment"));
    }

    #[test]
    fn storage_buffers_are_rejected() {
        let src = "@group(0) @binding(0) var<storage, read> data: array<f32>;\n@fragment fn f() {}";
        let err = reflect_stage(src, ShaderStage::Fragment).unwrap_err();
        assert!(err.message.contains("var<storage>"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn texture_on_odd_binding_is_rejected() {
        let src = "@group(1) @binding(1) var t: texture_2d<f32>;\n@fragment fn f() {}";
        let err = reflect_stage(src, ShaderStage::Fragment).unwrap_err();
        assert!(err.message.contains("even"));
    }

    #[test]
    fn uniform_outside_group_zero_is_rejected() {
        let src = "@group(2) @binding(0) var<uniform> x: f32;\n@fragment fn f() {}";
        let err = reflect_stage(src, ShaderStage::Fragment).unwrap_err();
        assert_eq!((err.line, err.col), (1, 36));
    }

    #[test]
    fn consts_aliases_and_helpers_are_skipped() {
        let src = r#"
            enable f16;
            const MINEXP: i32 = 120;
            alias Color = vec4<f32>;
            fn fade(x: f32) -> f32 { if (x > 0.0) { return fract(x); } return 0.0; }
            @group(0) @binding(1) var<uniform> tint: vec4f;
            @fragment fn f() -> @location(0) Color { return tint * fade(1.5); }
        "#;
        let fs = reflect_stage(src, ShaderStage::Fragment).unwrap();
        assert_eq!(fs.uniforms.len(), 1);
        assert_eq!(fs.uniforms[0].binding, 1);
    }

    #[test]
    fn merge_rejects_texture_moved_between_stages() {
        let vs_src = "@group(1) @binding(0) var sam: texture_2d<f32>;\n@vertex fn v() -> @builtin(position) vec4f { return vec4f(0.0); }";
        let fs_src = "@group(1) @binding(2) var sam: texture_2d<f32>;\n@group(1) @binding(3) var s: sampler;\n@fragment fn f() {}";
        let err = reflect(vs_src, fs_src).unwrap_err();
        assert!(err.message.contains("@binding(0)") && err.message.contains("@binding(2)"), "{err}");
    }

    #[test]
    fn merge_rejects_name_reused_for_another_kind() {
        let vs_src = "@group(1) @binding(1) var t: sampler;\n@vertex fn v() -> @builtin(position) vec4f { return vec4f(0.0); }";
        let fs_src = "@group(1) @binding(0) var t: texture_2d<f32>;\n@fragment fn f() {}";
        let err = reflect(vs_src, fs_src).unwrap_err();
        assert!(err.message.contains("sampler") && err.message.contains("texture"), "{err}");
    }

    #[test]
    fn merge_shares_textures_across_stages() {
        let vs_src = "@group(1) @binding(0) var sam: texture_2d<f32>;\n@vertex fn v() -> @builtin(position) vec4f { return vec4f(0.0); }";
        let r = reflect(vs_src, DISPLAY_FS).unwrap();
        assert_eq!(r.resources.len(), 2);
        assert_eq!(r.resources[0].visibility, wgpu::ShaderStages::VERTEX_FRAGMENT);
        assert_eq!(r.resources[1].visibility, wgpu::ShaderStages::FRAGMENT);
    }

    #[test]
    fn integer_textures_are_rejected() {
        for ty in ["texture_2d<u32>", "texture_2d<i32>", "texture_3d<f32>"] {
            let src = format!("@group(1) @binding(0) var t: {ty};\n@fragment fn f() {{}}");
            let err = reflect_stage(&src, ShaderStage::Fragment).unwrap_err();
            assert!(err.message.contains("only texture_2d<f32>"), "{ty}: {err}");
        }
    }

    #[test]
    fn bindings_may_use_const_expressions() {
        let src = "const BASE = 1u;\n@group(1) @binding((BASE + 1) * 2) var t: texture_2d<f32>;\n@group(0) @binding(BASE) var<uniform> x: f32;\n@fragment fn f() {}";
        let fs = reflect_stage(src, ShaderStage::Fragment).unwrap();
        assert_eq!(fs.resources[0].binding, 4);
        assert_eq!(fs.uniforms[0].binding, 1);
    }

    #[test]
    fn unknown_names_in_bindings_are_rejected() {
        let src = "@group(0) @binding(SLOT) var<uniform> x: f32;\n@fragment fn f() {}";
        let err = reflect_stage(src, ShaderStage::Fragment).unwrap_err();
        assert!(err.message.contains("constant integer expression"), "{err}");
    }

    #[test]
    fn array_length_may_name_a_const() {
        let src = "@group(0) @binding(0) var<uniform> w: array<f32, TAPS>;\nconst TAPS: i32 = 9;\n@fragment fn f() {}";
        let fs = reflect_stage(src, ShaderStage::Fragment).unwrap();
        assert_eq!(fs.uniforms[0].ty, UniformType::array(UniformElem::F32, 9));
    }

    #[test]
    fn vertex_input_struct_behind_alias() {
        let src = r#"
            struct VsIn { @location(0) position: vec3f, @location(1) uv: vec2f };
            alias Input = VsIn;
            @vertex fn v(input: Input) -> @builtin(position) vec4f { return vec4f(input.position, 1.0); }
        "#;
        let vs = reflect_stage(src, ShaderStage::Vertex).unwrap();
        let names: Vec<_> = vs.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["position", "uv"]);
    }

    #[test]
    fn unterminated_block_comment_reports_start() {
        let err = reflect_stage("\n  /* never closed", ShaderStage::Vertex).unwrap_err();
        assert_eq!((err.line, err.col), (2, 3));
    }

    #[test]
    fn display_includes_position() {
        let err = ReflectError::new("boom", 4, 7);
        assert_eq!(err.to_string(), "wgsl scan error at 4:7: boom");
    }
}
