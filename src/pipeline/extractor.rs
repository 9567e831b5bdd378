//! Ticket field extraction: fixed-label pattern rules over notice text.
//!
//! Pure and deterministic: the same text always yields the same fields.
//! Only a missing ticket number fails; every other field degrades to
//! absent or empty.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::error::ExtractionError;
use crate::pipeline::types::TicketFields;

/// Two-digit years below this land in 2000..=2068, the rest in 1969..=1999.
///
/// Same window as POSIX `strptime("%y")`, written out so it doesn't depend on
/// a library default.
pub const TWO_DIGIT_YEAR_PIVOT: u32 = 69;

/// Separator between description fragments.
pub const DESCRIPTION_SEPARATOR: &str = " - ";

static DEFAULT_EXTRACTOR: LazyLock<TicketExtractor> = LazyLock::new(TicketExtractor::new);

/// Extract fields using the built-in rules.
pub fn extract(text: &str) -> Result<TicketFields, ExtractionError> {
    DEFAULT_EXTRACTOR.extract(text)
}

/// One labeled fragment contributing to the description.
#[derive(Debug, Clone)]
struct DescriptionRule {
    field: &'static str,
    regex: Regex,
    /// Rendered before the value (`Work: ` for work type).
    prefix: &'static str,
}

/// Compiled extraction rules.
#[derive(Debug, Clone)]
pub struct TicketExtractor {
    ticket: Regex,
    old_ticket: Regex,
    legal_date: Regex,
    expiration_date: Regex,
    update_date: Regex,
    description_rules: Vec<DescriptionRule>,
    map_url: Regex,
}

impl Default for TicketExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in extraction pattern must compile")
}

impl TicketExtractor {
    pub fn new() -> Self {
        // Value patterns stop at the end of the label's line: an empty field
        // must not pick up the next line's label.
        let description_rules = vec![
            DescriptionRule {
                field: "state",
                regex: pattern(r"\bState:[ \t]*(\w+)"),
                prefix: "",
            },
            DescriptionRule {
                field: "county",
                regex: pattern(r"\bCnty:[ \t]*(\w+)"),
                prefix: "",
            },
            DescriptionRule {
                field: "place",
                regex: pattern(r"\bPlace:[ \t]*(\w+)"),
                prefix: "",
            },
            DescriptionRule {
                field: "street",
                regex: pattern(r"\bStreet[ \t]*:[ \t]*([^\n]+)"),
                prefix: "",
            },
            DescriptionRule {
                field: "cross_street",
                regex: pattern(r"\bCross 1[ \t]*:[ \t]*([^\n]+)"),
                prefix: "",
            },
            DescriptionRule {
                field: "location",
                regex: pattern(r"\bLocation:[ \t]*([^\n]+)"),
                prefix: "",
            },
            DescriptionRule {
                field: "work_type",
                regex: pattern(r"\bWork type:[ \t]*([^\n]+)"),
                prefix: "Work: ",
            },
        ];

        Self {
            ticket: pattern(r"\b(Old\s+)?Ticket\s*:\s*([A-Za-z0-9-]+)"),
            old_ticket: pattern(r"\bOld\s+Ticket\s*:\s*([A-Za-z0-9-]+)"),
            legal_date: pattern(r"\bLegal date:\s*([0-9]{2}/[0-9]{2}/[0-9]{2})\b"),
            expiration_date: pattern(r"\bGood Thru\s*:\s*([0-9]{2}/[0-9]{2}/[0-9]{2})\b"),
            update_date: pattern(r"\bUpdate By\s*:\s*([0-9]{2}/[0-9]{2}/[0-9]{2})\b"),
            description_rules,
            map_url: pattern(r"View ticket info at:\s*(https://\S+)"),
        }
    }

    /// Extract ticket fields from a notice body.
    pub fn extract(&self, text: &str) -> Result<TicketFields, ExtractionError> {
        let ticket_number = self
            .ticket_number(text)
            .ok_or(ExtractionError::MissingTicketNumber)?;
        let old_ticket_number = capture(&self.old_ticket, text);

        let fields = TicketFields {
            ticket_number,
            old_ticket_number,
            legal_date: self.date(&self.legal_date, text),
            expiration_date: self.date(&self.expiration_date, text),
            update_date: self.date(&self.update_date, text),
            description: self.description(text),
            map_url: capture(&self.map_url, text),
            full_text: text.to_string(),
            active_status: true,
        };

        debug!(
            ticket = %fields.ticket_number,
            old_ticket = ?fields.old_ticket_number,
            legal_date = ?fields.legal_date,
            expiration_date = ?fields.expiration_date,
            update_date = ?fields.update_date,
            description = %fields.description,
            map_url = ?fields.map_url,
            "Extracted ticket fields"
        );
        Ok(fields)
    }

    /// First `Ticket:` label that isn't an `Old Ticket:` label.
    fn ticket_number(&self, text: &str) -> Option<String> {
        self.ticket
            .captures_iter(text)
            .find(|caps| caps.get(1).is_none())
            .and_then(|caps| caps.get(2))
            .map(|m| m.as_str().to_string())
    }

    fn date(&self, rule: &Regex, text: &str) -> Option<NaiveDate> {
        capture(rule, text).and_then(|token| parse_two_digit_date(&token))
    }

    fn description(&self, text: &str) -> String {
        let parts: Vec<String> = self
            .description_rules
            .iter()
            .filter_map(|rule| {
                let value = capture(&rule.regex, text)?;
                debug!(field = rule.field, value = %value, "Description fragment");
                Some(format!("{}{}", rule.prefix, value))
            })
            .collect();
        parts.join(DESCRIPTION_SEPARATOR)
    }
}

/// First capture group of the first match, trimmed; empty counts as absent.
fn capture(rule: &Regex, text: &str) -> Option<String> {
    rule.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse `MM/DD/YY` into a calendar date using [`TWO_DIGIT_YEAR_PIVOT`].
///
/// Anything else (wrong shape, month 13, February 30) is `None`.
pub fn parse_two_digit_date(token: &str) -> Option<NaiveDate> {
    let mut parts = token.trim().split('/');
    let (month, day, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    if [month, day, year]
        .iter()
        .any(|p| p.len() != 2 || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    let yy: u32 = year.parse().ok()?;
    let year = if yy < TWO_DIGIT_YEAR_PIVOT {
        2000 + yy
    } else {
        1900 + yy
    };

    NaiveDate::from_ymd_opt(year as i32, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTICE: &str = "Ticket : A241270123  Rev: 00A  Taken: 05/06/24 07:01\n\
Legal date: 05/09/24 07:00  Good Thru : 06/03/24  Update By : 05/29/24\n\
\n\
State: UT   Cnty: SALT   Place: MIDVALE\n\
Street : 7200 S STATE ST\n\
Cross 1 : FORT UNION BLVD\n\
Location: MARK ENTIRE EAST SIDE OF PROPERTY\n\
Work type: INSTALL FIBER OPTIC CABLE\n\
View ticket info at: https://newtin.bluestakes.org/ticket?id=A241270123  \n";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn extracts_full_notice() {
        let fields = extract(NOTICE).unwrap();
        assert_eq!(fields.ticket_number, "A241270123");
        assert_eq!(fields.old_ticket_number, None);
        assert!(!fields.is_update());
        assert_eq!(fields.legal_date, Some(date(2024, 5, 9)));
        assert_eq!(fields.expiration_date, Some(date(2024, 6, 3)));
        assert_eq!(fields.update_date, Some(date(2024, 5, 29)));
        assert_eq!(
            fields.description,
            "UT - SALT - MIDVALE - 7200 S STATE ST - FORT UNION BLVD - \
             MARK ENTIRE EAST SIDE OF PROPERTY - Work: INSTALL FIBER OPTIC CABLE"
        );
        assert_eq!(
            fields.map_url.as_deref(),
            Some("https://newtin.bluestakes.org/ticket?id=A241270123")
        );
        assert_eq!(fields.full_text, NOTICE);
        assert!(fields.active_status);
    }

    #[test]
    fn simple_ticket_number() {
        let fields = extract("Ticket: ABC-123\n").unwrap();
        assert_eq!(fields.ticket_number, "ABC-123");
    }

    #[test]
    fn missing_ticket_number_fails() {
        assert_eq!(
            extract("State: UT\nWork type: Excavation\n"),
            Err(ExtractionError::MissingTicketNumber)
        );
    }

    #[test]
    fn old_ticket_marks_update() {
        let fields = extract("Ticket : A2-NEW\nOld Ticket : A1-OLD\n").unwrap();
        assert_eq!(fields.ticket_number, "A2-NEW");
        assert_eq!(fields.old_ticket_number.as_deref(), Some("A1-OLD"));
        assert!(fields.is_update());
    }

    #[test]
    fn old_ticket_label_first_does_not_steal_number() {
        let fields = extract("Old Ticket: A1-OLD\nTicket: A2-NEW\n").unwrap();
        assert_eq!(fields.ticket_number, "A2-NEW");
        assert_eq!(fields.old_ticket_number.as_deref(), Some("A1-OLD"));
    }

    #[test]
    fn only_old_ticket_is_missing_number() {
        assert_eq!(
            extract("Old Ticket: A1-OLD\n"),
            Err(ExtractionError::MissingTicketNumber)
        );
    }

    #[test]
    fn description_ordering_and_work_prefix() {
        let fields =
            extract("Ticket: T-1\nWork type: Excavation\nCnty: SALT\nState: UT\n").unwrap();
        assert_eq!(fields.description, "UT - SALT - Work: Excavation");
    }

    #[test]
    fn empty_description_when_no_fields() {
        let fields = extract("Ticket: T-1\n").unwrap();
        assert_eq!(fields.description, "");
        assert_eq!(fields.map_url, None);
    }

    #[test]
    fn blank_field_does_not_borrow_next_line() {
        let fields = extract("Ticket: T-1\nState:\nCnty: SALT\n").unwrap();
        assert_eq!(fields.description, "SALT");
    }

    #[test]
    fn crlf_values_are_trimmed() {
        let fields = extract("Ticket: T-1\r\nStreet : 100 N MAIN\r\nWork type: Trenching\r\n")
            .unwrap();
        assert_eq!(fields.description, "100 N MAIN - Work: Trenching");
    }

    #[test]
    fn garbled_dates_are_absent() {
        let fields = extract(
            "Ticket: T-1\nLegal date: 13/45/24\nGood Thru : soon\nUpdate By : 02/30/24\n",
        )
        .unwrap();
        assert_eq!(fields.legal_date, None);
        assert_eq!(fields.expiration_date, None);
        assert_eq!(fields.update_date, None);
    }

    #[test]
    fn four_digit_year_is_not_truncated() {
        let fields = extract("Ticket: T-1\nLegal date: 05/12/2024\n").unwrap();
        assert_eq!(fields.legal_date, None);
    }

    #[test]
    fn map_url_on_following_line() {
        let fields =
            extract("Ticket: T-1\nView ticket info at:\n  https://example.org/t/1\n").unwrap();
        assert_eq!(fields.map_url.as_deref(), Some("https://example.org/t/1"));
    }

    #[test]
    fn plain_http_map_url_ignored() {
        let fields = extract("Ticket: T-1\nView ticket info at: http://example.org/t/1\n").unwrap();
        assert_eq!(fields.map_url, None);
    }

    #[test]
    fn extraction_is_deterministic() {
        assert_eq!(extract(NOTICE).unwrap(), extract(NOTICE).unwrap());
    }

    // ── Date parsing ────────────────────────────────────────────────

    #[test]
    fn date_normalization() {
        assert_eq!(parse_two_digit_date("05/12/24"), Some(date(2024, 5, 12)));
    }

    #[test]
    fn date_pivot_window() {
        assert_eq!(parse_two_digit_date("01/01/00"), Some(date(2000, 1, 1)));
        assert_eq!(parse_two_digit_date("12/31/68"), Some(date(2068, 12, 31)));
        assert_eq!(parse_two_digit_date("01/01/69"), Some(date(1969, 1, 1)));
        assert_eq!(parse_two_digit_date("12/31/99"), Some(date(1999, 12, 31)));
    }

    #[test]
    fn date_rejects_bad_shapes() {
        assert_eq!(parse_two_digit_date(""), None);
        assert_eq!(parse_two_digit_date("5/12/24"), None);
        assert_eq!(parse_two_digit_date("05/12/2024"), None);
        assert_eq!(parse_two_digit_date("05/12/24/01"), None);
        assert_eq!(parse_two_digit_date("ab/cd/ef"), None);
        assert_eq!(parse_two_digit_date("02/29/23"), None);
        assert_eq!(parse_two_digit_date("02/29/24"), Some(date(2024, 2, 29)));
    }
}
