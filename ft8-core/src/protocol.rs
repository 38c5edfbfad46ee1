//! FT8/FT4 message grammar: callsign/grid/report parsing, canonicalization,
//! addressed-to-me and matches-target predicates, and the TX1-TX6 QSO
//! message templates (§3, §4.7 operator state machine).

use serde::{Deserialize, Serialize};

/// A parsed, canonicalized free-text QSO message.
///
/// Canonical form collapses whitespace to single spaces, upper-cases
/// callsigns/grids, and strips a trailing CQ/DE marker ambiguity so that
/// two textually-different renderings of the same message fingerprint
/// identically (§4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub kind: MessageKind,
    pub to_callsign: Option<String>,
    pub from_callsign: Option<String>,
    pub grid: Option<String>,
    pub report: Option<Report>,
    pub canonical_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Cq,
    GridCall,
    SignalReport,
    RogerReport,
    RogerRoger,
    Seventy3,
    FreeText,
}

/// A signal report, either a plain dB value or an R-prefixed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub db: i32,
    pub roger: bool,
}

impl Report {
    pub fn format(&self) -> String {
        if self.roger {
            format!("R{:+03}", self.db)
        } else {
            format!("{:+03}", self.db)
        }
    }
}

/// Upper-cases and trims a callsign, the canonical form used for
/// equality and fingerprinting throughout the engine.
pub fn canonicalize_callsign(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Upper-cases a 4 or 6 character Maidenhead grid locator.
pub fn canonicalize_grid(raw: &str) -> Option<String> {
    let g = raw.trim().to_ascii_uppercase();
    if is_valid_grid(&g) {
        Some(g)
    } else {
        None
    }
}

fn is_valid_grid(g: &str) -> bool {
    let chars: Vec<char> = g.chars().collect();
    match chars.len() {
        4 => {
            chars[0].is_ascii_uppercase()
                && chars[1].is_ascii_uppercase()
                && chars[2].is_ascii_digit()
                && chars[3].is_ascii_digit()
        }
        6 => {
            is_valid_grid(&g[..4])
                && chars[4].is_ascii_uppercase()
                && chars[5].is_ascii_uppercase()
        }
        _ => false,
    }
}

/// Collapses internal whitespace runs to single spaces and trims ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses free text received from the decoder into a structured message.
///
/// This is deliberately tolerant: anything that does not match a known
/// template falls back to [`MessageKind::FreeText`] with both callsign
/// fields left unset, rather than erroring, since malformed or partial
/// copy is expected at low SNR.
pub fn parse_message(raw: &str) -> ParsedMessage {
    let normalized = normalize_whitespace(raw);
    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

    let canonical_text = normalized.to_ascii_uppercase();

    if tokens.len() >= 2 && tokens[0].eq_ignore_ascii_case("CQ") {
        let (from, grid) = if tokens.len() >= 3 {
            (tokens[tokens.len() - 2], Some(tokens[tokens.len() - 1]))
        } else {
            (tokens[1], None)
        };
        let grid = grid.and_then(canonicalize_grid);
        return ParsedMessage {
            kind: MessageKind::Cq,
            to_callsign: None,
            from_callsign: Some(canonicalize_callsign(from)),
            grid,
            report: None,
            canonical_text,
        };
    }

    if tokens.len() == 2 && tokens[1].eq_ignore_ascii_case("73") {
        return ParsedMessage {
            kind: MessageKind::Seventy3,
            to_callsign: Some(canonicalize_callsign(tokens[0])),
            from_callsign: None,
            grid: None,
            report: None,
            canonical_text,
        };
    }

    if tokens.len() == 3 && tokens[2].eq_ignore_ascii_case("73") {
        return ParsedMessage {
            kind: MessageKind::Seventy3,
            to_callsign: Some(canonicalize_callsign(tokens[0])),
            from_callsign: Some(canonicalize_callsign(tokens[1])),
            grid: None,
            report: None,
            canonical_text,
        };
    }

    if tokens.len() == 3 && tokens[2].eq_ignore_ascii_case("RR73") {
        return ParsedMessage {
            kind: MessageKind::RogerRoger,
            to_callsign: Some(canonicalize_callsign(tokens[0])),
            from_callsign: Some(canonicalize_callsign(tokens[1])),
            grid: None,
            report: None,
            canonical_text,
        };
    }

    if tokens.len() == 3 {
        if let Some(report) = parse_report_token(tokens[2]) {
            let kind = if report.roger {
                MessageKind::RogerReport
            } else {
                MessageKind::SignalReport
            };
            return ParsedMessage {
                kind,
                to_callsign: Some(canonicalize_callsign(tokens[0])),
                from_callsign: Some(canonicalize_callsign(tokens[1])),
                grid: None,
                report: Some(report),
                canonical_text,
            };
        }
        if let Some(grid) = canonicalize_grid(tokens[2]) {
            return ParsedMessage {
                kind: MessageKind::GridCall,
                to_callsign: Some(canonicalize_callsign(tokens[0])),
                from_callsign: Some(canonicalize_callsign(tokens[1])),
                grid: Some(grid),
                report: None,
                canonical_text,
            };
        }
    }

    ParsedMessage {
        kind: MessageKind::FreeText,
        to_callsign: None,
        from_callsign: None,
        grid: None,
        report: None,
        canonical_text,
    }
}

fn parse_report_token(tok: &str) -> Option<Report> {
    let (roger, digits) = if let Some(rest) = tok.strip_prefix('R') {
        (true, rest)
    } else {
        (false, tok)
    };
    if digits.len() < 2 {
        return None;
    }
    let db: i32 = digits.parse().ok()?;
    if !(-50..=50).contains(&db) {
        return None;
    }
    Some(Report { db, roger })
}

/// True if `msg` is directed at `my_callsign` (§4.7 "addressed to me").
pub fn is_addressed_to_me(msg: &ParsedMessage, my_callsign: &str) -> bool {
    match &msg.to_callsign {
        Some(to) => to == &canonicalize_callsign(my_callsign),
        None => false,
    }
}

/// True if `msg` originates from `target_callsign`.
pub fn is_from_target(msg: &ParsedMessage, target_callsign: &str) -> bool {
    match &msg.from_callsign {
        Some(from) => from == &canonicalize_callsign(target_callsign),
        None => false,
    }
}

/// TX1: CQ call.
pub fn tx1_cq(my_callsign: &str, my_grid: Option<&str>) -> String {
    match my_grid {
        Some(grid) => format!("CQ {} {}", canonicalize_callsign(my_callsign), canonicalize_grid(grid).unwrap_or_else(|| grid.to_ascii_uppercase())),
        None => format!("CQ {}", canonicalize_callsign(my_callsign)),
    }
}

/// TX2: reply to a CQ with our grid.
pub fn tx2_grid_reply(their_callsign: &str, my_callsign: &str, my_grid: &str) -> String {
    format!(
        "{} {} {}",
        canonicalize_callsign(their_callsign),
        canonicalize_callsign(my_callsign),
        canonicalize_grid(my_grid).unwrap_or_else(|| my_grid.to_ascii_uppercase())
    )
}

/// TX3: send a signal report.
pub fn tx3_signal_report(their_callsign: &str, my_callsign: &str, db: i32) -> String {
    format!(
        "{} {} {}",
        canonicalize_callsign(their_callsign),
        canonicalize_callsign(my_callsign),
        Report { db, roger: false }.format()
    )
}

/// TX4: roger + signal report.
pub fn tx4_roger_report(their_callsign: &str, my_callsign: &str, db: i32) -> String {
    format!(
        "{} {} {}",
        canonicalize_callsign(their_callsign),
        canonicalize_callsign(my_callsign),
        Report { db, roger: true }.format()
    )
}

/// TX5: RR73 (roger, roger, 73).
pub fn tx5_rr73(their_callsign: &str, my_callsign: &str) -> String {
    format!(
        "{} {} RR73",
        canonicalize_callsign(their_callsign),
        canonicalize_callsign(my_callsign)
    )
}

/// TX6: plain 73, QSO complete.
pub fn tx6_seventy3(their_callsign: &str, my_callsign: &str) -> String {
    format!(
        "{} {} 73",
        canonicalize_callsign(their_callsign),
        canonicalize_callsign(my_callsign)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cq_with_grid() {
        let msg = parse_message("CQ W1ABC FN42");
        assert_eq!(msg.kind, MessageKind::Cq);
        assert_eq!(msg.from_callsign.as_deref(), Some("W1ABC"));
        assert_eq!(msg.grid.as_deref(), Some("FN42"));
    }

    #[test]
    fn parses_cq_without_grid() {
        let msg = parse_message("CQ W1ABC");
        assert_eq!(msg.kind, MessageKind::Cq);
        assert_eq!(msg.grid, None);
    }

    #[test]
    fn parses_grid_call() {
        let msg = parse_message("W1ABC K2XYZ FN42");
        assert_eq!(msg.kind, MessageKind::GridCall);
        assert_eq!(msg.to_callsign.as_deref(), Some("W1ABC"));
        assert_eq!(msg.from_callsign.as_deref(), Some("K2XYZ"));
    }

    #[test]
    fn parses_signal_report_and_roger() {
        let plain = parse_message("W1ABC K2XYZ -12");
        assert_eq!(plain.kind, MessageKind::SignalReport);
        assert_eq!(plain.report, Some(Report { db: -12, roger: false }));

        let roger = parse_message("W1ABC K2XYZ R-05");
        assert_eq!(roger.kind, MessageKind::RogerReport);
        assert_eq!(roger.report, Some(Report { db: -5, roger: true }));
    }

    #[test]
    fn parses_rr73_and_73() {
        let rr73 = parse_message("W1ABC K2XYZ RR73");
        assert_eq!(rr73.kind, MessageKind::RogerRoger);

        let just73 = parse_message("W1ABC 73");
        assert_eq!(just73.kind, MessageKind::Seventy3);
    }

    #[test]
    fn unrecognized_text_is_free_text() {
        let msg = parse_message("HELLO WORLD THIS IS NOISE");
        assert_eq!(msg.kind, MessageKind::FreeText);
    }

    #[test]
    fn addressed_to_me_is_case_insensitive() {
        let msg = parse_message("w1abc k2xyz rr73");
        assert!(is_addressed_to_me(&msg, "W1ABC"));
        assert!(is_from_target(&msg, "k2xyz"));
    }

    #[test]
    fn templates_round_trip_through_parser() {
        let cq = tx1_cq("W1ABC", Some("FN42"));
        let parsed = parse_message(&cq);
        assert_eq!(parsed.kind, MessageKind::Cq);

        let rr73 = tx5_rr73("K2XYZ", "W1ABC");
        let parsed = parse_message(&rr73);
        assert_eq!(parsed.kind, MessageKind::RogerRoger);

        let seventy3 = tx6_seventy3("K2XYZ", "W1ABC");
        let parsed = parse_message(&seventy3);
        assert_eq!(parsed.kind, MessageKind::Seventy3);
        assert_eq!(parsed.from_callsign.as_deref(), Some("W1ABC"));
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(normalize_whitespace("  CQ   W1ABC  FN42 "), "CQ W1ABC FN42");
    }
}
