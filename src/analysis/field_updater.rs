use super::{Detector, Finding, Rule, SiteContext};

/// Atomic field-updater factories: (method reference prefix, holder argument, name argument).
const UPDATER_FACTORIES: &[(&str, usize, usize)] = &[
    (
        "Ljava/util/concurrent/atomic/AtomicIntegerFieldUpdater;->newUpdater(",
        0,
        1,
    ),
    (
        "Ljava/util/concurrent/atomic/AtomicLongFieldUpdater;->newUpdater(",
        0,
        1,
    ),
    (
        "Ljava/util/concurrent/atomic/AtomicReferenceFieldUpdater;->newUpdater(",
        0,
        2,
    ),
];

/// Resolves a vault value passed as the field name of `newUpdater(holder, ..., name)`
/// to the holder's single volatile field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldUpdaterDetector;

impl Detector for FieldUpdaterDetector {
    fn rule(&self) -> Rule {
        Rule::FieldUpdater
    }

    fn inspect(&self, site: &SiteContext<'_>) -> Option<Finding> {
        let (position, invoke, live, holder_arg) =
            site.consumers().into_iter().find_map(|(position, ins, live)| {
                let reference = ins.reference.as_deref()?;
                let (_, holder, name) = UPDATER_FACTORIES
                    .iter()
                    .find(|(factory, _, _)| reference.starts_with(factory))?;
                let name_reg = ins.registers.get(*name)?;
                live.contains(name_reg).then_some((position, ins, live, *holder))
            })?;

        let Some(holder_reg) = invoke.registers.get(holder_arg) else {
            return Some(Finding::Unresolved("updater call without holder argument"));
        };
        if live.contains(holder_reg) {
            return Some(Finding::Unresolved("holder argument is the vault value"));
        }

        let Some(holder) = holder_class(site, position, holder_reg) else {
            return Some(Finding::Unresolved("holder class not loaded nearby"));
        };
        let Some(fields) = site.index.fields_of(holder) else {
            return Some(Finding::Unresolved("holder class outside the tree"));
        };

        let mut volatile = fields.iter().filter(|f| f.is_volatile());
        match (volatile.next(), volatile.next()) {
            (Some(field), None) => Some(Finding::Inferred(field.name.clone())),
            (None, _) => Some(Finding::Unresolved("holder has no volatile field")),
            (Some(_), Some(_)) => Some(Finding::Unresolved("holder has several volatile fields")),
        }
    }
}

/// Walks back from the updater call to the `const-class` that last wrote the
/// holder register, giving up at any other write or past the lookbehind floor.
fn holder_class<'a>(site: &SiteContext<'a>, call: usize, holder_reg: &str) -> Option<&'a str> {
    let floor = site.lookbehind_floor();
    site.instructions[floor..call]
        .iter()
        .rev()
        .find(|(_, ins)| ins.destination() == Some(holder_reg))
        .filter(|(_, ins)| ins.opcode == "const-class")
        .and_then(|(_, ins)| ins.reference.as_deref())
}
