use super::{Detector, Finding, Rule, SiteContext};

/// Name-based reflective lookups whose string argument may come from a vault.
const REFLECTIVE_LOOKUPS: &[&str] = &[
    "Ljava/lang/Class;->forName(",
    "Ljava/lang/Class;->getMethod(",
    "Ljava/lang/Class;->getDeclaredMethod(",
    "Ljava/lang/Class;->getField(",
    "Ljava/lang/Class;->getDeclaredField(",
];

/// Records vault values feeding class/method/field lookups. The target cannot
/// be recovered from local instructions, so these sites never infer a value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflectiveLookupDetector;

impl Detector for ReflectiveLookupDetector {
    fn rule(&self) -> Rule {
        Rule::ReflectiveLookup
    }

    fn inspect(&self, site: &SiteContext<'_>) -> Option<Finding> {
        site.consumers()
            .into_iter()
            .find(|(_, ins, _)| {
                ins.reference
                    .as_deref()
                    .is_some_and(|r| REFLECTIVE_LOOKUPS.iter().any(|l| r.starts_with(l)))
            })
            .map(|_| Finding::Unresolved("reflective lookup target is not local"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Rule;

    #[test]
    fn records_lookup_sites_without_value() {
        let body = "    const-class v0, Lcom/app/Target;\n    sget-object v1, Lcom/guard/V;->m:Ljava/lang/String;\n    const/4 v2, 0x0\n    new-array v2, v2, [Ljava/lang/Class;\n    invoke-virtual {v0, v1, v2}, Ljava/lang/Class;->getDeclaredMethod(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;\n";
        let sites = analyze(&[vault_unit(&["m"])], &consumer(body));
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].rule, Rule::ReflectiveLookup);
        assert_eq!(sites[0].value, None);
    }
}
