use crate::analysis::Rule;
use crate::error::Result;
use crate::plan::PatchPlan;
use crate::smali::line::{escape_literal, STRING_TYPE};
use crate::smali::CompilationUnit;
use crate::vault::{VaultClass, GENERATED_MARKER};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitializerOutcome {
    pub inferred: usize,
    pub overridden: usize,
    pub defaults: usize,
}

/// Text of the `<clinit>` assigning every vault field exactly once.
pub fn render(vault: &VaultClass, plan: &PatchPlan) -> (Vec<String>, InitializerOutcome) {
    let mut outcome = InitializerOutcome::default();
    let mut lines = vec![
        ".method static constructor <clinit>()V".to_string(),
        "    .registers 1".to_string(),
        String::new(),
        format!("    {GENERATED_MARKER}"),
    ];

    for field in &vault.fields {
        let value = match plan.get(&vault.descriptor, field) {
            Some(record) => {
                if record.origin == Rule::Override {
                    outcome.overridden += 1;
                } else {
                    outcome.inferred += 1;
                }
                record.value.as_str()
            }
            None => {
                outcome.defaults += 1;
                ""
            }
        };
        lines.push(format!("    const-string v0, {}", escape_literal(value)));
        lines.push(format!(
            "    sput-object v0, {}->{field}:{STRING_TYPE}",
            vault.descriptor
        ));
    }

    lines.push(String::new());
    lines.push("    return-void".to_string());
    lines.push(".end method".to_string());
    (lines, outcome)
}

/// Replaces (or appends) the vault's static initializer.
pub fn apply(unit: &mut CompilationUnit, plan: &PatchPlan) -> Result<InitializerOutcome> {
    let vault = VaultClass::from_unit(unit);
    let (text, outcome) = render(&vault, plan);
    let lines = text
        .iter()
        .map(|l| unit.synth(l))
        .collect::<Result<Vec<_>>>()?;

    let existing = unit
        .methods()
        .find(|m| m.decl.name == "<clinit>")
        .map(|m| m.start..m.end + 1);
    match existing {
        Some(range) => unit.splice(range, lines)?,
        None => {
            let mut block = vec![unit.synth("")?];
            block.extend(lines);
            unit.append(block)?;
        }
    }
    Ok(outcome)
}
