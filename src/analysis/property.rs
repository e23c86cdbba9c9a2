use super::{Detector, Finding, Rule, SiteContext};
use crate::smali::line::STRING_TYPE;

/// Return types accepted in a getter signature literal.
const STRING_LIKE: &[&str] = &[STRING_TYPE, "Ljava/lang/CharSequence;"];

/// Derives a property name from a nearby getter signature literal, as emitted
/// for property-reference metadata: `"getUserName()Ljava/lang/String;"` gives
/// `userName`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyNameDetector;

impl Detector for PropertyNameDetector {
    fn rule(&self) -> Rule {
        Rule::PropertyName
    }

    fn inspect(&self, site: &SiteContext<'_>) -> Option<Finding> {
        site.following()
            .iter()
            .filter(|(_, ins)| ins.opcode.starts_with("const-string"))
            .find_map(|(_, ins)| property_name(ins.literal.as_deref()?))
            .map(Finding::Inferred)
    }
}

/// `getSomething()` or `getSomething()Ljava/lang/String;` to `something`.
/// A bare `()` carries no return type and is accepted.
pub fn property_name(literal: &str) -> Option<String> {
    let rest = literal.strip_prefix("get")?;
    let (ident, ret) = rest.split_once("()")?;
    if !ret.is_empty() && !STRING_LIKE.contains(&ret) {
        return None;
    }

    let mut chars = ident.chars();
    let first = chars.next()?;
    if !(first.is_uppercase() || first == '_') {
        return None;
    }
    if !ident.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
        return None;
    }
    Some(first.to_lowercase().chain(chars).collect())
}
