//! F4 flow-fact file format
//!
//! Line-oriented directives:
//!
//! ```text
//! loop ADDR N;
//! checksum "file.elf" HEX;
//! nocall "label";
//! branch ADDR = ADDR [, ADDR]*;
//! return ADDR;
//! ignorecontrol ADDR;
//! multibranch ADDR;
//! noreturn "label";
//! infeasible ADDR, ADDR [, FIRST_IT|LAST_IT|ALL_IT];
//! ```
//!
//! `infeasible` is not named in the wire format enumerated by the external
//! interface, but IPET construction requires infeasible-path facts from
//! somewhere (see `INFEASIBLE_PATH` in the IPET module); it is added here as
//! a natural extension of the same line-directive grammar, documented in
//! `DESIGN.md`.

use super::{FlowFacts, InfeasiblePath, IterQualifier};
use crate::error::{Result, WcetError};

/// Parse an entire F4 source text into [`FlowFacts`].
///
/// Errors are reported with `file:line`, as the error-handling design
/// requires for input errors.
pub fn parse(source: &str, file_name: &str) -> Result<FlowFacts> {
    let mut facts = FlowFacts::new();
    for (line_no, raw_line) in source.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line = line.strip_suffix(';').unwrap_or(line).trim();
        parse_directive(line, &mut facts).map_err(|message| {
            WcetError::input(format!("{file_name}:{}", line_no + 1), message)
        })?;
    }
    Ok(facts)
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_directive(line: &str, facts: &mut FlowFacts) -> std::result::Result<(), String> {
    let mut tokens = line.splitn(2, char::is_whitespace);
    let keyword = tokens.next().unwrap_or("");
    let rest = tokens.next().unwrap_or("").trim();

    match keyword {
        "loop" => {
            let mut parts = rest.split_whitespace();
            let addr = parse_addr(parts.next().ok_or("loop: missing address")?)?;
            let n: u64 = parts
                .next()
                .ok_or("loop: missing iteration bound")?
                .parse()
                .map_err(|_| "loop: iteration bound is not an integer".to_string())?;
            facts.loop_bounds.insert(addr, n);
        }
        "checksum" => {
            let (name, hex) = parse_quoted_then_value(rest)?;
            let value = u32::from_str_radix(hex.trim_start_matches("0x"), 16)
                .map_err(|_| "checksum: value is not hex".to_string())?;
            facts.checksums.insert(name, value);
        }
        "nocall" => {
            let name = parse_quoted(rest)?;
            facts.no_call.insert(name);
        }
        "noreturn" => {
            let name = parse_quoted(rest)?;
            facts.no_return.insert(name);
        }
        "return" => {
            facts.returns.insert(parse_addr(rest)?);
        }
        "ignorecontrol" => {
            facts.ignore_control.insert(parse_addr(rest)?);
        }
        "multibranch" => {
            facts.multibranch.insert(parse_addr(rest)?);
        }
        "branch" => {
            let mut sides = rest.splitn(2, '=');
            let addr = parse_addr(sides.next().ok_or("branch: missing address")?.trim())?;
            let targets_str = sides.next().ok_or("branch: missing '='")?;
            let mut targets = Vec::new();
            for t in targets_str.split(',') {
                targets.push(parse_addr(t.trim())?);
            }
            facts.branch_targets.insert(addr, targets);
        }
        "infeasible" => {
            let mut parts = rest.split(',');
            let a = parse_addr(parts.next().ok_or("infeasible: missing first address")?.trim())?;
            let b = parse_addr(parts.next().ok_or("infeasible: missing second address")?.trim())?;
            let qualifier = match parts.next().map(|s| s.trim()) {
                None | Some("") => IterQualifier::AllIt,
                Some("FIRST_IT") => IterQualifier::FirstIt,
                Some("LAST_IT") => IterQualifier::LastIt,
                Some("ALL_IT") => IterQualifier::AllIt,
                Some(other) => return Err(format!("infeasible: unknown qualifier `{other}`")),
            };
            facts.infeasible_paths.push(InfeasiblePath { a, b, qualifier });
        }
        other => return Err(format!("unknown directive `{other}`")),
    }
    Ok(())
}

fn parse_addr(token: &str) -> std::result::Result<u32, String> {
    let token = token.trim();
    let digits = token.strip_prefix("0x").unwrap_or(token);
    u32::from_str_radix(digits, 16)
        .or_else(|_| token.parse::<u32>())
        .map_err(|_| format!("`{token}` is not a valid address"))
}

fn parse_quoted(token: &str) -> std::result::Result<String, String> {
    let token = token.trim();
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted string, found `{token}`"))?;
    Ok(inner.to_string())
}

fn parse_quoted_then_value(rest: &str) -> std::result::Result<(String, String), String> {
    let end_quote = rest
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '"')
        .map(|(i, _)| i)
        .ok_or("checksum: unterminated string")?;
    let name = parse_quoted(&rest[..=end_quote])?;
    let value = rest[end_quote + 1..].trim().to_string();
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loop_bound() {
        let facts = parse("loop 0x1000 100;", "test.f4").unwrap();
        assert_eq!(facts.loop_bounds.get(&0x1000), Some(&100));
    }

    #[test]
    fn parses_nocall_and_checksum() {
        let facts = parse(
            "nocall \"panic_handler\";\nchecksum \"a.elf\" DEADBEEF;",
            "test.f4",
        )
        .unwrap();
        assert!(facts.no_call.contains("panic_handler"));
        assert_eq!(facts.checksums.get("a.elf"), Some(&0xDEADBEEFu32));
    }

    #[test]
    fn parses_branch_with_multiple_targets() {
        let facts = parse("branch 0x200 = 0x300, 0x400;", "test.f4").unwrap();
        assert_eq!(facts.branch_targets.get(&0x200), Some(&vec![0x300, 0x400]));
    }

    #[test]
    fn parses_infeasible_with_qualifier() {
        let facts = parse("infeasible 0x10, 0x20, FIRST_IT;", "test.f4").unwrap();
        assert_eq!(facts.infeasible_paths.len(), 1);
        assert_eq!(facts.infeasible_paths[0].qualifier, IterQualifier::FirstIt);
    }

    #[test]
    fn rejects_unknown_directive() {
        let err = parse("frobnicate 0x10;", "test.f4").unwrap_err();
        assert!(matches!(err, WcetError::Input { .. }));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let facts = parse("// a comment\n\nloop 0x10 5;\n", "test.f4").unwrap();
        assert_eq!(facts.loop_bounds.get(&0x10), Some(&5));
    }
}
