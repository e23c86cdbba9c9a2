use std::ops::Range;
use std::path::{Path, PathBuf};

use super::line::{FieldDecl, Instruction, Line, LineKind, LineReader, MethodDecl};
use crate::error::{Error, Result};

/// One parsed smali file, held as an editable list of line-nodes.
///
/// Edits are expressed as node splices; the structural index (class
/// descriptor, field and method positions) is rebuilt after every splice so
/// callers never do offset arithmetic.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    path: PathBuf,
    original: String,
    newline: &'static str,
    lines: Vec<Line>,
    descriptor: String,
    fields: Vec<usize>,
    methods: Vec<Range<usize>>,
}

/// Borrowed view over one `.method` ... `.end method` block.
#[derive(Debug, Clone, Copy)]
pub struct Method<'a> {
    /// Node index of the `.method` line.
    pub start: usize,
    /// Node index of the `.end method` line.
    pub end: usize,
    pub decl: &'a MethodDecl,
    lines: &'a [Line],
}

impl<'a> Method<'a> {
    /// Lines between the method's begin and end markers.
    pub fn body(&self) -> &'a [Line] {
        &self.lines[self.start + 1..self.end]
    }

    /// Instructions with their absolute node indices.
    pub fn instructions(&self) -> Vec<(usize, &'a Instruction)> {
        self.body()
            .iter()
            .enumerate()
            .filter_map(|(i, line)| line.instruction().map(|ins| (self.start + 1 + i, ins)))
            .collect()
    }

    pub fn contains_comment(&self, text: &str) -> bool {
        self.body()
            .iter()
            .any(|l| matches!(l.kind(), LineKind::Comment) && l.text() == text)
    }

    pub fn contains_label(&self, name: &str) -> bool {
        self.body().iter().any(|l| l.is_label(name))
    }
}

impl CompilationUnit {
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let path = path.into();
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let mut reader = LineReader::default();
        let lines = text
            .split_inclusive('\n')
            .enumerate()
            .map(|(i, raw)| reader.read(raw).map_err(|m| Error::parse(&path, i + 1, m)))
            .collect::<Result<Vec<_>>>()?;

        let mut unit = Self {
            path,
            original: text.to_string(),
            newline,
            lines,
            descriptor: String::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        unit.reindex()?;
        Ok(unit)
    }

    fn reindex(&mut self) -> Result<()> {
        let mut descriptor = None;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut open: Option<usize> = None;

        for (i, line) in self.lines.iter().enumerate() {
            match line.kind() {
                LineKind::Class(d) => {
                    if descriptor.is_some() {
                        return Err(Error::parse(&self.path, i + 1, "Duplicate .class header"));
                    }
                    descriptor = Some(d.clone());
                }
                LineKind::Field(_) if open.is_none() => fields.push(i),
                LineKind::MethodStart(_) => {
                    if open.is_some() {
                        return Err(Error::parse(&self.path, i + 1, "Nested .method"));
                    }
                    open = Some(i);
                }
                LineKind::MethodEnd => {
                    let start = open
                        .take()
                        .ok_or_else(|| Error::parse(&self.path, i + 1, ".end method without .method"))?;
                    methods.push(start..i);
                }
                _ => {}
            }
        }

        if let Some(start) = open {
            return Err(Error::parse(&self.path, start + 1, "Unterminated .method"));
        }
        self.descriptor =
            descriptor.ok_or_else(|| Error::parse(&self.path, 1, "Missing .class header"))?;
        self.fields = fields;
        self.methods = methods;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Line terminator used by this file.
    pub fn newline(&self) -> &'static str {
        self.newline
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDecl> + '_ {
        self.fields.iter().filter_map(|&i| match self.lines[i].kind() {
            LineKind::Field(f) => Some(f),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = Method<'_>> + '_ {
        self.methods.iter().filter_map(|span| match self.lines[span.start].kind() {
            LineKind::MethodStart(decl) => Some(Method {
                start: span.start,
                end: span.end,
                decl,
                lines: &self.lines,
            }),
            _ => None,
        })
    }

    pub fn method_at(&self, start: usize) -> Option<Method<'_>> {
        self.methods().find(|m| m.start == start)
    }

    pub fn has_source_marker(&self) -> bool {
        self.lines.iter().any(|l| matches!(l.kind(), LineKind::Source))
    }

    /// Builds a node from generated text, terminated with this file's newline.
    pub fn synth(&self, text: &str) -> Result<Line> {
        Line::parse(format!("{text}{}", self.newline)).map_err(|m| Error::parse(&self.path, 0, m))
    }

    /// Replaces the nodes in `range` with `replacement` and rebuilds the index.
    pub fn splice(&mut self, range: Range<usize>, replacement: Vec<Line>) -> Result<()> {
        self.lines.splice(range, replacement);
        self.reindex()
    }

    pub fn insert(&mut self, at: usize, lines: Vec<Line>) -> Result<()> {
        self.splice(at..at, lines)
    }

    /// Appends nodes at the end of the file, terminating the last line first.
    pub fn append(&mut self, lines: Vec<Line>) -> Result<()> {
        let newline = self.newline;
        if let Some(last) = self.lines.last_mut() {
            if !last.has_terminator() {
                last.push_terminator(newline);
            }
        }
        let end = self.lines.len();
        self.insert(end, lines)
    }

    pub fn render(&self) -> String {
        self.lines.iter().map(Line::raw).collect()
    }

    pub fn is_changed(&self) -> bool {
        self.render() != self.original
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
.class public La/Holder;
.super Ljava/lang/Object;
.source \"Holder.java\"

.field private volatile count:I

.method public constructor <init>()V
    .locals 0
    invoke-direct {p0}, Ljava/lang/Object;-><init>()V
    return-void
.end method
";

    #[test]
    fn indexes_structure() {
        let unit = CompilationUnit::parse("Holder.smali", SAMPLE).unwrap();
        assert_eq!(unit.descriptor(), "La/Holder;");
        assert_eq!(unit.fields().count(), 1);
        let methods: Vec<_> = unit.methods().collect();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].decl.name, "<init>");
        assert_eq!(methods[0].instructions().len(), 2);
        assert!(unit.has_source_marker());
        assert_eq!(unit.render(), SAMPLE);
        assert!(!unit.is_changed());
    }

    #[test]
    fn rejects_malformed_units() {
        assert!(CompilationUnit::parse("x", ".super Ljava/lang/Object;\n").is_err());
        let unterminated = ".class La/B;\n.method public f()V\n    return-void\n";
        let Err(Error::Parse { line, .. }) = CompilationUnit::parse("x", unterminated) else {
            panic!("expected parse error");
        };
        assert_eq!(line, 2);
        assert!(CompilationUnit::parse("x", ".class La/B;\n.end method\n").is_err());
    }

    #[test]
    fn splices_keep_index_consistent() {
        let mut unit = CompilationUnit::parse("Holder.smali", SAMPLE).unwrap();
        let field = unit.synth(".field private static tag:Ljava/lang/String;").unwrap();
        unit.insert(4, vec![field]).unwrap();
        assert_eq!(unit.fields().count(), 2);
        assert_eq!(unit.methods().next().unwrap().start, 7);
        assert!(unit.is_changed());
    }

    #[test]
    fn keeps_kotlin_metadata_and_odd_literals() {
        let text = "\
.class public final La/Repo;
.super Ljava/lang/Object;

.annotation runtime Lkotlin/Metadata;
    d2 = {
        \"template {id} value\",
        \"La/Repo;\"
    }
.end annotation

.method public static key()Ljava/lang/String;
    .locals 1
    const-string v0, \"\\ud800\"
    return-object v0
.end method
";
        let unit = CompilationUnit::parse("Repo.smali", text).unwrap();
        let method = unit.methods().next().unwrap();
        let (_, ins) = method.instructions()[0];
        assert_eq!(ins.literal.as_deref(), Some("\u{fffd}"));
        assert_eq!(unit.render(), text);
    }

    #[test]
    fn preserves_crlf_terminators() {
        let text = ".class La/B;\r\n.super Ljava/lang/Object;";
        let mut unit = CompilationUnit::parse("B.smali", text).unwrap();
        assert_eq!(unit.newline(), "\r\n");
        let blank = unit.synth("").unwrap();
        unit.append(vec![blank]).unwrap();
        assert_eq!(unit.render(), ".class La/B;\r\n.super Ljava/lang/Object;\r\n\r\n");
    }
}
