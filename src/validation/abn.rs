//! ABN checksum (ATO modulus 89)

const ABN_WEIGHTS: [u32; 11] = [10, 1, 3, 5, 7, 9, 11, 13, 15, 17, 19];

/// Validate an Australian Business Number.
///
/// Whitespace anywhere in the input is ignored. Anything that is not exactly
/// eleven ASCII digits afterwards is invalid. Never panics.
pub fn validate_abn(input: &str) -> bool {
    let digits: Vec<u32> = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(10).filter(|_| c.is_ascii_digit()))
        .collect::<Option<Vec<u32>>>()
        .unwrap_or_default();

    if digits.len() != ABN_WEIGHTS.len() {
        return false;
    }

    // First digit less one; a leading zero gives -1, which is never a valid ABN
    // prefix but still has to be summed without underflow.
    let first = digits[0] as i64 - 1;
    let rest: i64 = digits[1..]
        .iter()
        .zip(&ABN_WEIGHTS[1..])
        .map(|(d, w)| (d * w) as i64)
        .sum();

    (first * ABN_WEIGHTS[0] as i64 + rest) % 89 == 0
}
