// src/utils/log.rs

//! Run-report formatting on top of the `log` facade.
//!
//! Batch runs and maintenance passes print a header and a key/value summary
//! so scheduler output stays readable in plain log files.

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{border}");
    log::info!("  {title}");
    log::info!("{border}");
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("{}", format_summary(title, items));
}

fn format_summary(title: &str, items: &[(&str, String)]) -> String {
    let mut out = format!("[SUMMARY] {title}");
    for (key, value) in items {
        out.push_str(&format!("\n    {key}: {value}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_summary() {
        let text = format_summary("Run", &[("checked", "3".into()), ("errors", "1".into())]);
        assert_eq!(text, "[SUMMARY] Run\n    checked: 3\n    errors: 1");
    }
}
