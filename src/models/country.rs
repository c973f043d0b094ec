//! Country metadata: bidding-zone EIC codes used as `in_Domain`/`out_Domain`.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Country {
    pub code: String,
    pub name: String,
    pub eic_code: String,
    /// IANA timezone of the bidding zone (informational)
    pub timezone: String,
}

struct CountryEntry {
    code: &'static str,
    name: &'static str,
    eic_code: &'static str,
    timezone: &'static str,
}

const COUNTRIES: &[CountryEntry] = &[
    CountryEntry { code: "DE", name: "Germany", eic_code: "10Y1001A1001A82H", timezone: "Europe/Berlin" },
    CountryEntry { code: "FR", name: "France", eic_code: "10YFR-RTE------C", timezone: "Europe/Paris" },
    CountryEntry { code: "NL", name: "Netherlands", eic_code: "10YNL----------L", timezone: "Europe/Amsterdam" },
    CountryEntry { code: "BE", name: "Belgium", eic_code: "10YBE----------2", timezone: "Europe/Brussels" },
    CountryEntry { code: "AT", name: "Austria", eic_code: "10YAT-APG------L", timezone: "Europe/Vienna" },
    CountryEntry { code: "CH", name: "Switzerland", eic_code: "10YCH-SWISSGRIDZ", timezone: "Europe/Zurich" },
    CountryEntry { code: "ES", name: "Spain", eic_code: "10YES-REE------0", timezone: "Europe/Madrid" },
    CountryEntry { code: "PL", name: "Poland", eic_code: "10YPL-AREA-----S", timezone: "Europe/Warsaw" },
    CountryEntry { code: "CZ", name: "Czech Republic", eic_code: "10YCZ-CEPS-----N", timezone: "Europe/Prague" },
    CountryEntry { code: "FI", name: "Finland", eic_code: "10YFI-1--------U", timezone: "Europe/Helsinki" },
];

/// Look up a country by its two-letter code (case-insensitive)
pub fn lookup(code: &str) -> Option<Country> {
    let code = code.trim();
    COUNTRIES
        .iter()
        .find(|entry| entry.code.eq_ignore_ascii_case(code))
        .map(|entry| Country {
            code: entry.code.to_string(),
            name: entry.name.to_string(),
            eic_code: entry.eic_code.to_string(),
            timezone: entry.timezone.to_string(),
        })
}

pub fn available_codes() -> Vec<&'static str> {
    COUNTRIES.iter().map(|entry| entry.code).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_germany() {
        let country = lookup("DE").unwrap();
        assert_eq!(country.name, "Germany");
        assert_eq!(country.eic_code, "10Y1001A1001A82H");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup(" fr ").unwrap().code, "FR");
    }

    #[test]
    fn test_unknown_country() {
        assert!(lookup("XX").is_none());
        assert!(!available_codes().contains(&"XX"));
    }
}
