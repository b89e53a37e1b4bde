//! Currency display for figures quoted in answers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Gbp,
    Idr,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Gbp => "GBP",
            Self::Idr => "IDR",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Usd => "$",
            Self::Gbp => "£",
            Self::Idr => "Rp",
        }
    }

    fn thousands_separator(&self) -> char {
        match self {
            Self::Idr => '.',
            Self::Usd | Self::Gbp => ',',
        }
    }

    /// Look up a currency by ISO code, case-insensitively.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "USD" => Some(Self::Usd),
            "GBP" => Some(Self::Gbp),
            "IDR" => Some(Self::Idr),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Format `amount` as whole units with the symbol in front, e.g. `$12,500`
/// or `Rp3.900.000`. Negative amounts put the sign before the symbol.
pub fn format_currency(amount: f64, currency: Currency) -> String {
    let rounded = if amount.is_finite() { amount.round() } else { 0.0 };
    let digits = (rounded.abs() as u64).to_string();

    let separator = currency.thousands_separator();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(ch);
    }

    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{}{}{}", sign, currency.symbol(), grouped)
}
