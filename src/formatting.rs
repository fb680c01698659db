//! Rupiah formatting and cashier input parsing.

/// Group digits with `.` every three places: `1250000` -> `1.250.000`.
pub fn group_thousands(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

/// `Rp. 12.000`. No decimals; IDR amounts are whole.
pub fn format_idr(amount: i64) -> String {
    format!("Rp. {}", group_thousands(amount))
}

/// Parse what the cashier typed into the payment field.
///
/// Accepts plain digits (`65000`), an optional `Rp` / `Rp.` prefix and digits
/// grouped in threes by `.` or `,` (`65.000`, `Rp 1,250,000`). Returns `None`
/// for anything else, including empty input and negative numbers.
pub fn parse_amount(input: &str) -> Option<i64> {
    let mut s = input.trim();
    if s.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("rp")) {
        s = s[2..].trim_start();
        s = s.strip_prefix('.').unwrap_or(s).trim_start();
    }
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().ok();
    }

    let sep = if s.contains('.') { '.' } else { ',' };
    let groups: Vec<&str> = s.split(sep).collect();
    let well_formed = groups.len() > 1
        && (1..=3).contains(&groups[0].len())
        && groups[1..].iter().all(|g| g.len() == 3)
        && groups
            .iter()
            .all(|g| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return None;
    }
    groups.concat().parse().ok()
}
