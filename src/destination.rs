/// Minimum trimmed length of a plausible address, e.g. `a@b.co`.
const MIN_ADDRESS_LEN: usize = 6;

/// Coarse syntactic check that filters out blank spreadsheet cells.
///
/// Blank, whitespace-only, `nan` and `none` (any case) are rejected; anything
/// else needs an `@`, a `.` and at least six characters.
pub fn is_valid_destination(address: &str) -> bool {
    let address = address.trim();
    if address.is_empty()
        || address.eq_ignore_ascii_case("nan")
        || address.eq_ignore_ascii_case("none")
    {
        return false;
    }
    address.contains('@') && address.contains('.') && address.chars().count() >= MIN_ADDRESS_LEN
}
