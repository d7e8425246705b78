/// Two-way selection in expression position. Used to flatten boolean
/// node state (scram latched, degraded) into wire words and to pick
/// between timer outcomes without an `if` block at every call site.
#[macro_export]
macro_rules! choose {
    ($cond: expr => $true_val: expr, $false_val: expr) => {{
        if $cond {
            $true_val
        } else {
            $false_val
        }
    }};
}
