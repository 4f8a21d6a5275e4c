//! ANSI output helpers for the lifecycle commands.
#![allow(dead_code)]

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";

/// Boxed command header.
pub fn header(title: &str) {
    let inner = title.len() + 2;
    println!("{CYAN}┌{}┐{RESET}", "─".repeat(inner));
    println!("{CYAN}│ {BOLD}{title}{RESET}{CYAN} │{RESET}");
    println!("{CYAN}└{}┘{RESET}", "─".repeat(inner));
}

/// Green check line for a passed step.
pub fn pass(label: &str, detail: &str) {
    if detail.is_empty() {
        println!(" {GREEN}✓{RESET} {label}");
    } else {
        println!(" {GREEN}✓{RESET} {label} {DIM}{detail}{RESET}");
    }
}

/// Yellow bang line for a warning step.
pub fn warn(label: &str, detail: &str) {
    if detail.is_empty() {
        println!(" {YELLOW}!{RESET} {label}");
    } else {
        println!(" {YELLOW}!{RESET} {label} {DIM}{detail}{RESET}");
    }
}

/// Red cross line for a failed step.
pub fn fail(label: &str, detail: &str) {
    if detail.is_empty() {
        println!(" {RED}✗{RESET} {label}");
    } else {
        println!(" {RED}✗{RESET} {label} {DIM}{detail}{RESET}");
    }
}

/// Abort message plus hint, printed after a failed step.
pub fn abort(reason: &str, hint: &str) {
    println!();
    println!("{RED}{BOLD}Preflight failed:{RESET} {reason}");
    if !hint.is_empty() {
        println!("{DIM}Hint: {hint}{RESET}");
    }
}

/// Indented excerpt block (error-log tails).
pub fn excerpt(title: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    println!("{DIM}── {title} ──{RESET}");
    for line in lines {
        println!("{DIM}  {line}{RESET}");
    }
}

/// Shorten a model id for display: `claude-opus-4-6` → `Opus 4.6`.
pub fn format_model_name(model_id: &str) -> String {
    let name = model_id.strip_prefix("claude-").unwrap_or(model_id);
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() >= 3 {
        let version: Vec<&str> = parts[1..]
            .iter()
            .filter(|p| !(p.chars().all(|c| c.is_ascii_digit()) && p.len() >= 8))
            .copied()
            .collect();
        let mut family = parts[0].to_string();
        if let Some(first) = family.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        format!("{} {}", family, version.join("."))
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_shorten() {
        assert_eq!(format_model_name("claude-opus-4-6"), "Opus 4.6");
        assert_eq!(format_model_name("claude-opus-4-5-20251101"), "Opus 4.5");
        assert_eq!(format_model_name("claude-sonnet-4-5"), "Sonnet 4.5");
        assert_eq!(format_model_name("gpt-5"), "gpt-5");
    }
}
