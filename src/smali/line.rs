//! Typed line-nodes for disassembled smali text.
//!
//! Every physical line of a unit becomes exactly one [`Line`], which keeps its
//! raw text (terminator included) next to the parsed [`LineKind`]. Rendering a
//! unit is the concatenation of raw texts, so untouched lines round-trip
//! byte-for-byte.

pub const STRING_TYPE: &str = "Ljava/lang/String;";

/// Opcode prefixes whose first register operand is read, not written.
const NON_WRITING_PREFIXES: &[&str] = &[
    "invoke-",
    "sput",
    "iput",
    "aput",
    "if-",
    "return",
    "throw",
    "goto",
    "check-cast",
    "monitor-",
    "fill-array-data",
    "packed-switch",
    "sparse-switch",
    "filled-new-array",
    "nop",
];

/// Directives whose contents are data, not code.
const DATA_BLOCKS: &[&str] = &[
    ".annotation",
    ".subannotation",
    ".array-data",
    ".packed-switch",
    ".sparse-switch",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    raw: String,
    kind: LineKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Comment,
    /// `.class` header carrying the class descriptor.
    Class(String),
    Super,
    /// `.source` debug annotation.
    Source,
    Field(FieldDecl),
    MethodStart(MethodDecl),
    MethodEnd,
    Label(String),
    /// Any other dot-directive, keyed by its keyword (`.locals`, `.catch`, ...).
    Directive(String),
    Instruction(Instruction),
    /// Element line inside an annotation or data block, kept opaque.
    Payload,
}

impl Line {
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        let kind = LineKind::classify(raw.trim())?;
        Ok(Self { raw, kind })
    }

    fn payload(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            kind: LineKind::Payload,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Line content without indentation or terminator.
    pub fn text(&self) -> &str {
        self.raw.trim()
    }

    pub fn kind(&self) -> &LineKind {
        &self.kind
    }

    pub fn has_terminator(&self) -> bool {
        self.raw.ends_with('\n')
    }

    pub(crate) fn push_terminator(&mut self, newline: &str) {
        self.raw.push_str(newline);
    }

    /// Leading whitespace of the raw line.
    pub fn indent(&self) -> &str {
        let trimmed = self.raw.trim_start_matches([' ', '\t']);
        &self.raw[..self.raw.len() - trimmed.len()]
    }

    pub fn instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            LineKind::Instruction(ins) => Some(ins),
            _ => None,
        }
    }

    pub fn is_label(&self, name: &str) -> bool {
        matches!(&self.kind, LineKind::Label(l) if l == name)
    }

    pub fn is_directive(&self, keyword: &str) -> bool {
        matches!(&self.kind, LineKind::Directive(d) if d == keyword)
    }
}

/// Parses the lines of one unit in order. Lines between a data-block
/// directive and its `.end` are not parsed.
#[derive(Debug, Default)]
pub(crate) struct LineReader {
    blocks: Vec<&'static str>,
}

impl LineReader {
    pub(crate) fn read(&mut self, raw: &str) -> Result<Line, String> {
        let text = raw.trim();
        if let Some(&block) = self.blocks.last() {
            if text.strip_prefix(".end").map(str::trim) == Some(&block[1..]) {
                self.blocks.pop();
                return Line::parse(raw);
            }
        }
        let keyword = text.split_whitespace().next().unwrap_or_default();
        if let Some(&opened) = DATA_BLOCKS.iter().find(|b| **b == keyword) {
            self.blocks.push(opened);
            return Line::parse(raw);
        }
        if self.blocks.is_empty() {
            Line::parse(raw)
        } else {
            Ok(Line::payload(raw))
        }
    }
}

impl LineKind {
    fn classify(text: &str) -> Result<Self, String> {
        if text.is_empty() {
            return Ok(LineKind::Blank);
        }
        if text.starts_with('#') {
            return Ok(LineKind::Comment);
        }
        if let Some(label) = text.strip_prefix(':') {
            return Ok(LineKind::Label(label.to_string()));
        }
        if !text.starts_with('.') {
            return Instruction::parse(text).map(LineKind::Instruction);
        }

        let keyword = text.split_whitespace().next().unwrap_or(text);
        match keyword {
            ".class" => {
                let descriptor = text
                    .split_whitespace()
                    .last()
                    .filter(|d| is_class_descriptor(d))
                    .ok_or_else(|| format!("Malformed class header: {text}"))?;
                Ok(LineKind::Class(descriptor.to_string()))
            }
            ".super" => Ok(LineKind::Super),
            ".source" => Ok(LineKind::Source),
            ".field" => FieldDecl::parse(text).map(LineKind::Field),
            ".method" => MethodDecl::parse(text).map(LineKind::MethodStart),
            ".end" if text.split_whitespace().nth(1) == Some("method") => Ok(LineKind::MethodEnd),
            _ => Ok(LineKind::Directive(keyword.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: String,
    pub flags: Vec<String>,
    pub has_initial_value: bool,
}

impl FieldDecl {
    fn parse(text: &str) -> Result<Self, String> {
        let body = text.trim_start_matches(".field").trim();
        let (decl, initial) = match body.split_once(" = ") {
            Some((decl, _)) => (decl, true),
            None => (body, false),
        };
        let mut tokens: Vec<&str> = decl.split_whitespace().collect();
        let name_type = tokens
            .pop()
            .ok_or_else(|| format!("Empty field declaration: {text}"))?;
        let (name, ty) = name_type
            .split_once(':')
            .filter(|(n, t)| !n.is_empty() && is_type_descriptor(t))
            .ok_or_else(|| format!("Malformed field declaration: {text}"))?;

        Ok(Self {
            name: name.to_string(),
            ty: ty.to_string(),
            flags: tokens.into_iter().map(str::to_string).collect(),
            has_initial_value: initial,
        })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_static(&self) -> bool {
        self.has_flag("static")
    }

    pub fn is_volatile(&self) -> bool {
        self.has_flag("volatile")
    }

    pub fn is_string(&self) -> bool {
        self.ty == STRING_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    /// Full prototype, e.g. `(Landroid/content/Context;)V`.
    pub descriptor: String,
    pub flags: Vec<String>,
    params: Vec<String>,
    ret: String,
}

impl MethodDecl {
    fn parse(text: &str) -> Result<Self, String> {
        let body = text.trim_start_matches(".method").trim();
        let mut tokens: Vec<&str> = body.split_whitespace().collect();
        let signature = tokens
            .pop()
            .ok_or_else(|| format!("Empty method declaration: {text}"))?;
        let open = signature
            .find('(')
            .ok_or_else(|| format!("Malformed method signature: {text}"))?;
        let (name, descriptor) = signature.split_at(open);
        let close = descriptor
            .find(')')
            .ok_or_else(|| format!("Malformed method signature: {text}"))?;
        let params = split_types(&descriptor[1..close])
            .ok_or_else(|| format!("Malformed parameter list: {text}"))?;
        let ret = &descriptor[close + 1..];
        if name.is_empty() || !(ret == "V" || is_type_descriptor(ret)) {
            return Err(format!("Malformed method signature: {text}"));
        }

        Ok(Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            flags: tokens.into_iter().map(str::to_string).collect(),
            params,
            ret: ret.to_string(),
        })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_static(&self) -> bool {
        self.has_flag("static")
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    pub fn has_body(&self) -> bool {
        !self.has_flag("abstract") && !self.has_flag("native")
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn return_type(&self) -> &str {
        &self.ret
    }

    /// Registers occupied by parameters, `this` included.
    pub fn param_registers(&self) -> usize {
        let this = usize::from(!self.is_static());
        this + self.params.iter().map(|p| type_width(p)).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub registers: Vec<String>,
    /// Trailing non-register operand: member/type reference, label or numeric literal.
    pub reference: Option<String>,
    /// Decoded value of a `const-string` literal.
    pub literal: Option<String>,
}

impl Instruction {
    fn parse(text: &str) -> Result<Self, String> {
        let (opcode, rest) = match text.split_once(char::is_whitespace) {
            Some((op, rest)) => (op, rest.trim()),
            None => (text, ""),
        };
        let mut ins = Self {
            opcode: opcode.to_string(),
            registers: Vec::new(),
            reference: None,
            literal: None,
        };

        if let Some(list) = rest.strip_prefix('{') {
            let (regs, tail) = list
                .split_once('}')
                .ok_or_else(|| format!("Unterminated register list: {text}"))?;
            ins.registers = expand_register_list(regs)
                .ok_or_else(|| format!("Malformed register list: {text}"))?;
            let tail = tail.trim_start_matches([',', ' ']).trim();
            if !tail.is_empty() {
                ins.reference = Some(tail.to_string());
            }
        } else if opcode.starts_with("const-string") {
            let (reg, literal) = rest
                .split_once(',')
                .ok_or_else(|| format!("Malformed const-string: {text}"))?;
            ins.registers.push(reg.trim().to_string());
            ins.literal = Some(
                unescape_literal(literal.trim())
                    .ok_or_else(|| format!("Malformed string literal: {text}"))?,
            );
        } else if !rest.is_empty() {
            for operand in rest.split(',').map(str::trim) {
                if is_register(operand) {
                    ins.registers.push(operand.to_string());
                } else {
                    ins.reference = Some(operand.to_string());
                }
            }
        }

        Ok(ins)
    }

    pub fn is_invoke(&self) -> bool {
        self.opcode.starts_with("invoke-")
    }

    /// Register written by this instruction, if any.
    pub fn destination(&self) -> Option<&str> {
        if NON_WRITING_PREFIXES.iter().any(|p| self.opcode.starts_with(p)) {
            return None;
        }
        self.registers.first().map(String::as_str)
    }

    pub fn reads(&self, register: &str) -> bool {
        let skip = usize::from(self.destination().is_some());
        self.registers.iter().skip(skip).any(|r| r == register)
    }

    /// Parses the reference as a field reference (`Lcls;->name:Type`).
    pub fn field_ref(&self) -> Option<FieldRef> {
        FieldRef::parse(self.reference.as_deref()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub ty: String,
}

impl FieldRef {
    pub fn parse(text: &str) -> Option<Self> {
        let (class, member) = text.split_once("->")?;
        let (name, ty) = member.split_once(':')?;
        if !is_class_descriptor(class) || !is_type_descriptor(ty) {
            return None;
        }
        Some(Self {
            class: class.to_string(),
            name: name.to_string(),
            ty: ty.to_string(),
        })
    }
}

pub fn is_register(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('v' | 'p'))
        && !chars.as_str().is_empty()
        && chars.all(|c| c.is_ascii_digit())
}

fn expand_register_list(list: &str) -> Option<Vec<String>> {
    let list = list.trim();
    if list.is_empty() {
        return Some(Vec::new());
    }
    if let Some((first, last)) = list.split_once("..") {
        let (first, last) = (first.trim(), last.trim());
        if !is_register(first) || !is_register(last) || first[..1] != last[..1] {
            return None;
        }
        let prefix = &first[..1];
        let from: usize = first[1..].parse().ok()?;
        let to: usize = last[1..].parse().ok()?;
        return Some((from..=to).map(|n| format!("{prefix}{n}")).collect());
    }
    list.split(',')
        .map(str::trim)
        .map(|r| is_register(r).then(|| r.to_string()))
        .collect()
}

pub fn is_class_descriptor(text: &str) -> bool {
    text.len() > 2 && text.starts_with('L') && text.ends_with(';')
}

pub fn is_type_descriptor(text: &str) -> bool {
    matches!(split_types(text).as_deref(), Some([_]))
}

/// Splits a concatenation of type descriptors (a parameter list).
pub fn split_types(text: &str) -> Option<Vec<String>> {
    let mut types = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i] == b'[' {
            i += 1;
        }
        match bytes.get(i)? {
            b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' => i += 1,
            b'L' => i += text[i..].find(';')? + 1,
            _ => return None,
        }
        types.push(text[start..i].to_string());
    }
    Some(types)
}

/// Register slots taken by a value of this type.
pub fn type_width(ty: &str) -> usize {
    if ty == "J" || ty == "D" {
        2
    } else {
        1
    }
}

pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
    out
}

pub fn unescape_literal(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut units: Vec<u16> = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u16; 2];
            units.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }
        let decoded = match chars.next()? {
            'n' => '\n' as u16,
            'r' => '\r' as u16,
            't' => '\t' as u16,
            'b' => 0x08,
            'f' => 0x0c,
            '0' => 0,
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                u16::from_str_radix(&hex, 16).ok().filter(|_| hex.len() == 4)?
            }
            other => other as u16,
        };
        units.push(decoded);
    }
    // Lone surrogates are legal in dex strings.
    Some(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(text: &str) -> LineKind {
        Line::parse(text).unwrap().kind().clone()
    }

    #[test]
    fn classifies_structural_lines() {
        assert_eq!(kind(".class public final La/b/C;\n"), LineKind::Class("La/b/C;".into()));
        assert_eq!(kind("    .end method\n"), LineKind::MethodEnd);
        assert_eq!(kind(".source \"C.java\""), LineKind::Source);
        assert_eq!(kind("    :cond_0"), LineKind::Label("cond_0".into()));
        assert_eq!(kind("    .locals 2"), LineKind::Directive(".locals".into()));
        assert_eq!(kind("# direct methods"), LineKind::Comment);
        assert!(Line::parse(".class public").is_err());
    }

    #[test]
    fn parses_field_declarations() {
        let LineKind::Field(f) = kind(".field public static volatile a:Ljava/lang/String;") else {
            panic!("not a field");
        };
        assert_eq!(f.name, "a");
        assert!(f.is_static() && f.is_volatile() && f.is_string());
        assert!(!f.has_initial_value);

        let LineKind::Field(f) = kind(".field static final b:Ljava/lang/String; = \"x: y\"") else {
            panic!("not a field");
        };
        assert_eq!(f.name, "b");
        assert!(f.has_initial_value);
    }

    #[test]
    fn parses_method_declarations() {
        let LineKind::MethodStart(m) =
            kind(".method public onReceive(Landroid/content/Context;Landroid/content/Intent;)V")
        else {
            panic!("not a method");
        };
        assert_eq!(m.name, "onReceive");
        assert_eq!(m.params().len(), 2);
        assert_eq!(m.return_type(), "V");
        assert_eq!(m.param_registers(), 3);

        let LineKind::MethodStart(m) = kind(".method static sum(JI[D)J") else {
            panic!("not a method");
        };
        assert_eq!(m.param_registers(), 4);
        assert_eq!(m.return_type(), "J");
    }

    #[test]
    fn parses_instructions() {
        let ins = Instruction::parse(
            "invoke-static {v0 .. v2}, Ljava/util/concurrent/atomic/AtomicReferenceFieldUpdater;->newUpdater(Ljava/lang/Class;Ljava/lang/Class;Ljava/lang/String;)Ljava/util/concurrent/atomic/AtomicReferenceFieldUpdater;",
        )
        .unwrap();
        assert_eq!(ins.registers, ["v0", "v1", "v2"]);
        assert!(ins.is_invoke());
        assert_eq!(ins.destination(), None);

        let ins = Instruction::parse("sget-object v1, La/V;->b:Ljava/lang/String;").unwrap();
        assert_eq!(ins.destination(), Some("v1"));
        let field = ins.field_ref().unwrap();
        assert_eq!((field.class.as_str(), field.name.as_str()), ("La/V;", "b"));

        let ins = Instruction::parse(r#"const-string v3, "getName()Ljava/lang/String;""#).unwrap();
        assert_eq!(ins.literal.as_deref(), Some("getName()Ljava/lang/String;"));
    }

    #[test]
    fn string_literals_survive_escaping() {
        for value in ["", "plain", "quote\" and \\ slash", "tab\tnew\nline", "Ünïcødé ✓"] {
            assert_eq!(unescape_literal(&escape_literal(value)).as_deref(), Some(value));
        }
        assert_eq!(unescape_literal(r#""Ab""#).as_deref(), Some("Ab"));
    }

    #[test]
    fn lone_surrogates_decode_lossily() {
        let ins = Instruction::parse(r#"const-string v0, "\ud800x""#).unwrap();
        assert_eq!(ins.literal.as_deref(), Some("\u{fffd}x"));
        assert_eq!(unescape_literal(r#""\udc00""#).as_deref(), Some("\u{fffd}"));
    }

    #[test]
    fn data_block_contents_stay_opaque() {
        let mut reader = LineReader::default();
        let lines: Vec<Line> = [
            ".annotation runtime Lkotlin/Metadata;\n",
            "    d2 = {\n",
            "        \"template {id} value\",\n",
            "        \"<init>\"\n",
            "    }\n",
            "    .subannotation Lretrofit2/http/Headers;\n",
            "        value = \"a {b}\"\n",
            "    .end subannotation\n",
            ".end annotation\n",
            "    invoke-static {v0}, La/B;->c(I)V\n",
        ]
        .into_iter()
        .map(|raw| reader.read(raw).unwrap())
        .collect();

        assert_eq!(lines[0].kind(), &LineKind::Directive(".annotation".into()));
        assert_eq!(lines[2].kind(), &LineKind::Payload);
        assert_eq!(lines[5].kind(), &LineKind::Directive(".subannotation".into()));
        assert_eq!(lines[6].kind(), &LineKind::Payload);
        assert_eq!(lines[8].kind(), &LineKind::Directive(".end".into()));
        assert!(lines[9].instruction().is_some());
        assert!(Line::parse("        \"template {id} value\",").is_err());
    }
}
