//! Identity Matcher — the one pure predicate the rest of the engine builds
//! on: does a selector's identity set apply to a target's identity set?

/// Returns true iff every element of `selector` appears in `target`. An
/// empty selector matches everything.
pub fn matches(selector: &[String], target: &[String]) -> bool {
    selector.iter().all(|id| target.contains(id))
}
