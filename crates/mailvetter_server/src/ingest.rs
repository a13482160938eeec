//! CSV ingest for bulk uploads
//!
//! Uploaded files carry one address per row in column 0. A leading header
//! row is skipped only when it is literally one of the recognized header
//! spellings — anything else in row one is treated as data.

use csv::ReaderBuilder;

const HEADER_SPELLINGS: &[&str] = &["email", "Email", "Email Address"];

/// Extract the email column from a CSV payload.
///
/// Rows with an empty first column are dropped; other columns are ignored.
pub fn parse_email_column(payload: &[u8]) -> Result<Vec<String>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(payload);

    let mut emails = Vec::new();
    let mut first_row = true;

    for record in reader.records() {
        let record = record?;
        let Some(value) = record.get(0) else {
            first_row = false;
            continue;
        };
        let value = value.trim();

        if first_row && HEADER_SPELLINGS.contains(&value) {
            first_row = false;
            continue;
        }
        first_row = false;

        if !value.is_empty() {
            emails.push(value.to_string());
        }
    }

    Ok(emails)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_row_is_skipped() {
        let csv = b"email\nada@example.com\ngrace@example.com\n";
        let emails = parse_email_column(csv).unwrap();
        assert_eq!(emails, vec!["ada@example.com", "grace@example.com"]);
    }

    #[test]
    fn all_header_spellings_are_recognized() {
        for header in ["email", "Email", "Email Address"] {
            let csv = format!("{header}\nada@example.com\n");
            let emails = parse_email_column(csv.as_bytes()).unwrap();
            assert_eq!(emails, vec!["ada@example.com"], "{header}");
        }
    }

    #[test]
    fn headerless_files_keep_the_first_row() {
        let csv = b"ada@example.com\ngrace@example.com\n";
        let emails = parse_email_column(csv).unwrap();
        assert_eq!(emails.len(), 2);
    }

    #[test]
    fn a_header_lookalike_after_row_one_is_data() {
        let csv = b"ada@example.com\nemail\n";
        let emails = parse_email_column(csv).unwrap();
        assert_eq!(emails, vec!["ada@example.com", "email"]);
    }

    #[test]
    fn extra_columns_and_blank_rows_are_ignored() {
        let csv = b"email,name\nada@example.com,Ada\n,missing\ngrace@example.com,Grace\n";
        let emails = parse_email_column(csv).unwrap();
        assert_eq!(emails, vec!["ada@example.com", "grace@example.com"]);
    }
}
