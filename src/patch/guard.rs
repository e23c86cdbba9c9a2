//! Wraps crash-prone method bodies in a catch-all region.
//!
//! The injected handler swallows the throwable (optionally passing it to a
//! configured static hook first) and returns the type's default value.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::smali::{CompilationUnit, LineKind, Method};

pub const GUARD_START: &str = "unvault_guard_start";
pub const GUARD_END: &str = "unvault_guard_end";
pub const GUARD_HANDLER: &str = "unvault_guard_handler";

/// Selects methods by name and/or prototype; every present component must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
}

impl MethodMatcher {
    pub fn matches(&self, method: &Method<'_>) -> bool {
        if self.name.is_none() && self.descriptor.is_none() {
            return false;
        }
        self.name.as_ref().map_or(true, |n| *n == method.decl.name)
            && self
                .descriptor
                .as_ref()
                .map_or(true, |d| *d == method.decl.descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
    #[serde(default = "GuardConfig::default_targets")]
    pub targets: Vec<MethodMatcher>,
    /// Static `(Ljava/lang/Throwable;)V` method called with the caught error.
    #[serde(default)]
    pub hook: Option<String>,
    /// Class-descriptor prefixes that are never wrapped.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            targets: Self::default_targets(),
            hook: None,
            exclude: Vec::new(),
        }
    }
}

impl GuardConfig {
    fn default_targets() -> Vec<MethodMatcher> {
        vec![MethodMatcher {
            name: Some("onReceive".to_string()),
            descriptor: Some("(Landroid/content/Context;Landroid/content/Intent;)V".to_string()),
        }]
    }

    fn hook_class(&self) -> Option<&str> {
        self.hook.as_deref()?.split_once("->").map(|(class, _)| class)
    }

    /// Units defining the safety net itself must not be rewritten.
    pub fn excludes(&self, descriptor: &str) -> bool {
        self.hook_class() == Some(descriptor)
            || self.exclude.iter().any(|p| descriptor.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardOutcome {
    pub injected: usize,
    /// Target methods left alone because they could not be wrapped safely.
    pub skipped: Vec<String>,
}

pub fn apply(unit: &mut CompilationUnit, config: &GuardConfig) -> Result<GuardOutcome> {
    let mut outcome = GuardOutcome::default();
    if config.excludes(unit.descriptor()) {
        return Ok(outcome);
    }

    let mut targets: Vec<usize> = unit
        .methods()
        .filter(|m| config.targets.iter().any(|t| t.matches(m)))
        .map(|m| m.start)
        .collect();
    // Bottom-up so earlier node indices stay valid across splices.
    targets.reverse();

    for start in targets {
        let Some(method) = unit.method_at(start) else { continue };
        let name = format!("{}->{}{}", unit.descriptor(), method.decl.name, method.decl.descriptor);
        match plan(&method, config) {
            Ok(Some(edit)) => {
                edit.apply(unit)?;
                debug!("Wrapped {name}");
                outcome.injected += 1;
            }
            Ok(None) => {}
            Err(reason) => {
                warn!("{}: not wrapping {name}: {reason}", unit.path().display());
                outcome.skipped.push(format!("{name}: {reason}"));
            }
        }
    }
    Ok(outcome)
}

/// Node-level edits for one method, applied bottom-up.
#[derive(Debug)]
struct GuardEdit {
    registers_line: Option<(usize, String)>,
    start_at: usize,
    end_at: usize,
    start_block: Vec<String>,
    end_block: Vec<String>,
}

impl GuardEdit {
    fn apply(self, unit: &mut CompilationUnit) -> Result<()> {
        let end = self
            .end_block
            .iter()
            .map(|l| unit.synth(l))
            .collect::<Result<Vec<_>>>()?;
        unit.insert(self.end_at, end)?;

        let start = self
            .start_block
            .iter()
            .map(|l| unit.synth(l))
            .collect::<Result<Vec<_>>>()?;
        unit.insert(self.start_at, start)?;

        if let Some((at, text)) = self.registers_line {
            let line = unit.synth(&text)?;
            unit.splice(at..at + 1, vec![line])?;
        }
        Ok(())
    }
}

fn plan(method: &Method<'_>, config: &GuardConfig) -> std::result::Result<Option<GuardEdit>, String> {
    let decl = method.decl;
    if method.contains_label(GUARD_START) {
        return Ok(None);
    }
    if decl.is_constructor() {
        return Err("constructors are not wrapped".into());
    }
    if !decl.has_body() {
        return Err("method has no body".into());
    }

    let ret = decl.return_type();
    let value_regs = match ret {
        "V" => 0,
        "J" | "D" => 2,
        _ => 1,
    };
    let needed = value_regs.max(usize::from(config.hook.is_some()));

    let (reg_index, reg_line) = method
        .body()
        .iter()
        .enumerate()
        .find(|(_, l)| l.is_directive(".locals") || l.is_directive(".registers"))
        .ok_or("missing .locals/.registers directive")?;
    let reg_index = method.start + 1 + reg_index;
    let mut tokens = reg_line.text().split_whitespace();
    let directive = tokens.next().unwrap_or_default();
    let count: usize = tokens
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or("malformed register directive")?;

    let registers_line = if directive == ".locals" {
        (count < needed).then(|| (reg_index, format!("{}.locals {needed}", reg_line.indent())))
    } else {
        let locals = count.checked_sub(decl.param_registers()).ok_or("register count below parameter count")?;
        if locals < needed {
            return Err(format!("needs {needed} free registers, .registers leaves {locals}"));
        }
        None
    };

    let start_at = first_code_line(method).ok_or("no instructions to protect")?;
    let indent = "    ";

    let mut end_block = vec![
        format!("{indent}:{GUARD_END}"),
        format!("{indent}.catch Ljava/lang/Throwable; {{:{GUARD_START} .. :{GUARD_END}}} :{GUARD_HANDLER}"),
        String::new(),
        format!("{indent}:{GUARD_HANDLER}"),
    ];
    if let Some(hook) = &config.hook {
        end_block.push(format!("{indent}move-exception v0"));
        end_block.push(format!("{indent}invoke-static {{v0}}, {hook}"));
    }
    end_block.extend(default_return(ret).iter().map(|l| format!("{indent}{l}")));

    Ok(Some(GuardEdit {
        registers_line,
        start_at,
        end_at: method.end,
        start_block: vec![format!("{indent}:{GUARD_START}")],
        end_block,
    }))
}

/// Node index of the first line after the register directive, parameter
/// declarations and method annotations.
fn first_code_line(method: &Method<'_>) -> Option<usize> {
    let mut depth = 0usize;
    for (i, line) in method.body().iter().enumerate() {
        match line.kind() {
            LineKind::Blank | LineKind::Comment => continue,
            LineKind::Directive(d) if d == ".annotation" || d == ".subannotation" => depth += 1,
            LineKind::Directive(d) if d == ".end" => {
                let what = line.text().split_whitespace().nth(1);
                if matches!(what, Some("annotation" | "subannotation")) {
                    depth = depth.saturating_sub(1);
                }
            }
            _ if depth > 0 => continue,
            LineKind::Directive(d) if matches!(d.as_str(), ".locals" | ".registers" | ".param") => {}
            _ => return Some(method.start + 1 + i),
        }
    }
    None
}

fn default_return(ret: &str) -> &'static [&'static str] {
    match ret {
        "V" => &["return-void"],
        "J" | "D" => &["const-wide/16 v0, 0x0", "return-wide v0"],
        "Z" | "B" | "S" | "C" | "I" | "F" => &["const/4 v0, 0x0", "return v0"],
        _ => &["const/4 v0, 0x0", "return-object v0"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIVER: &str = "\
.class public Lcom/app/Receiver;
.super Landroid/content/BroadcastReceiver;
.source \"Receiver.java\"

.method public onReceive(Landroid/content/Context;Landroid/content/Intent;)V
    .locals 0
    .param p1, \"context\"
    .annotation build Landroidx/annotation/NonNull;
    .end annotation
    .end param

    .line 12
    invoke-virtual {p2}, Landroid/content/Intent;->getAction()Ljava/lang/String;
    return-void
.end method

.method public count()J
    .registers 3
    invoke-static {}, Lcom/app/Native;->count()J
    move-result-wide v0
    return-wide v0
.end method
";

    fn body_of(text: &str, name: &str) -> String {
        let start = text.find(&format!(" {name}(")).unwrap();
        let end = start + text[start..].find(".end method").unwrap();
        text[start..end].to_string()
    }

    #[test]
    fn wraps_void_target_after_preamble() {
        let mut unit = CompilationUnit::parse("Receiver.smali", RECEIVER).unwrap();
        let outcome = apply(&mut unit, &GuardConfig::default()).unwrap();
        assert_eq!(outcome.injected, 1);

        let text = unit.render();
        let body = body_of(&text, "onReceive");
        let start = body.find(":unvault_guard_start").unwrap();
        assert!(start > body.find(".end param").unwrap());
        assert!(start < body.find(".line 12").unwrap());
        assert!(body.contains(".catch Ljava/lang/Throwable; {:unvault_guard_start .. :unvault_guard_end} :unvault_guard_handler"));
        assert!(body.trim_end().ends_with(":unvault_guard_handler\n    return-void"));
        assert!(!body_of(&text, "count").contains("unvault_guard"));
    }

    #[test]
    fn rerun_is_a_no_op() {
        let mut unit = CompilationUnit::parse("Receiver.smali", RECEIVER).unwrap();
        apply(&mut unit, &GuardConfig::default()).unwrap();
        let first = unit.render();

        let mut again = CompilationUnit::parse("Receiver.smali", &first).unwrap();
        let outcome = apply(&mut again, &GuardConfig::default()).unwrap();
        assert_eq!(outcome.injected, 0);
        assert_eq!(again.render(), first);
    }

    #[test]
    fn value_returning_methods_get_defaults_and_register_budget() {
        let config = GuardConfig {
            targets: vec![MethodMatcher {
                name: Some("count".into()),
                descriptor: None,
            }],
            ..GuardConfig::default()
        };
        let mut unit = CompilationUnit::parse("Receiver.smali", RECEIVER).unwrap();
        assert_eq!(apply(&mut unit, &config).unwrap().injected, 1);
        let body = body_of(&unit.render(), "count");
        assert!(body.contains("const-wide/16 v0, 0x0\n    return-wide v0"));

        let tight = RECEIVER.replace(".registers 3", ".registers 2");
        let mut unit = CompilationUnit::parse("Receiver.smali", &tight).unwrap();
        let outcome = apply(&mut unit, &config).unwrap();
        assert_eq!(outcome.injected, 0);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(!unit.is_changed());
    }

    #[test]
    fn hook_raises_locals_and_excludes_its_own_class() {
        let config = GuardConfig {
            hook: Some("Lcom/app/Receiver;->onError(Ljava/lang/Throwable;)V".into()),
            ..GuardConfig::default()
        };
        let mut unit = CompilationUnit::parse("Receiver.smali", RECEIVER).unwrap();
        assert_eq!(apply(&mut unit, &config).unwrap().injected, 0);

        let config = GuardConfig {
            hook: Some("Lcom/app/Safety;->onError(Ljava/lang/Throwable;)V".into()),
            ..GuardConfig::default()
        };
        apply(&mut unit, &config).unwrap();
        let body = body_of(&unit.render(), "onReceive");
        assert!(body.contains("    .locals 1\n"));
        assert!(body.contains("move-exception v0\n    invoke-static {v0}, Lcom/app/Safety;->onError"));
    }

    #[test]
    fn non_void_targets_return_null_or_zero() {
        let text = "\
.class public Lcom/app/Values;
.super Ljava/lang/Object;

.method public name()Ljava/lang/Object;
    .locals 0
    invoke-static {}, Lcom/app/Native;->name()Ljava/lang/Object;
    move-result-object p0
    return-object p0
.end method

.method public static table()[I
    .locals 0
    invoke-static {}, Lcom/app/Native;->table()[I
    move-result-object p0
    return-object p0
.end method

.method public static size()I
    .locals 0
    invoke-static {}, Lcom/app/Native;->size()I
    move-result p0
    return p0
.end method

.method public static ready()Z
    .locals 0
    invoke-static {}, Lcom/app/Native;->ready()Z
    move-result p0
    return p0
.end method

.method public static ratio()F
    .locals 0
    invoke-static {}, Lcom/app/Native;->ratio()F
    move-result p0
    return p0
.end method
";
        let config = GuardConfig {
            targets: ["name", "table", "size", "ready", "ratio"]
                .into_iter()
                .map(|name| MethodMatcher {
                    name: Some(name.into()),
                    descriptor: None,
                })
                .collect(),
            ..GuardConfig::default()
        };
        let mut unit = CompilationUnit::parse("Values.smali", text).unwrap();
        assert_eq!(apply(&mut unit, &config).unwrap().injected, 5);

        let text = unit.render();
        for name in ["name", "table"] {
            let body = body_of(&text, name);
            assert!(body.contains("    .locals 1\n"), "{name}");
            assert!(body.contains(":unvault_guard_handler\n    const/4 v0, 0x0\n    return-object v0"), "{name}");
        }
        for name in ["size", "ready", "ratio"] {
            let body = body_of(&text, name);
            assert!(body.contains("    .locals 1\n"), "{name}");
            assert!(body.contains(":unvault_guard_handler\n    const/4 v0, 0x0\n    return v0"), "{name}");
        }
    }
}
