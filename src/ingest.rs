use anyhow::{bail, Context};

/// One parsed grade line from an uploaded sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeRow {
    pub reg_number: String,
    pub subject: String,
    pub marks: String,
}

/// Column tokens we accept for each field. Teachers export these sheets
/// from several tools, so header names vary wildly.
const REG_TOKENS: &[&str] = &["roll", "reg", "registration"];
const SUBJECT_TOKENS: &[&str] = &["subject", "sub"];
const MARKS_TOKENS: &[&str] = &["mark", "score"];

fn find_column(headers: &[String], tokens: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| tokens.iter().any(|t| h.contains(t)))
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',')
        .map(|cell| cell.trim().trim_matches('"').trim().to_string())
        .collect()
}

/// Parse a CSV grade sheet. Header matching is case-insensitive and
/// substring-tolerant; every cell is kept as text (marks are never
/// interpreted numerically here). Rows missing a register number or
/// subject are dropped.
pub fn parse_grade_csv(bytes: &[u8]) -> anyhow::Result<Vec<GradeRow>> {
    let text = std::str::from_utf8(bytes).context("grade file is not valid UTF-8 text")?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines.next().context("uploaded file is empty")?;
    let headers: Vec<String> = split_row(header_line)
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let Some(reg_col) = find_column(&headers, REG_TOKENS) else {
        bail!("missing register-number column (expected a header containing 'roll' or 'reg')");
    };
    let Some(subject_col) = find_column(&headers, SUBJECT_TOKENS) else {
        bail!("missing subject column");
    };
    let Some(marks_col) = find_column(&headers, MARKS_TOKENS) else {
        bail!("missing marks column");
    };

    let mut rows = Vec::new();
    for line in lines {
        let cells = split_row(line);
        let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();
        let reg_number = cell(reg_col);
        let subject = cell(subject_col);
        if reg_number.is_empty() || subject.is_empty() {
            continue;
        }
        rows.push(GradeRow { reg_number, subject, marks: cell(marks_col) });
    }
    if rows.is_empty() {
        bail!("no usable rows in uploaded file");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tolerant_headers() {
        let csv = b"Roll No,Subject Name,Marks Obtained\n21CS001,Maths,88\n21CS002,Physics,74\n";
        let rows = parse_grade_csv(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], GradeRow {
            reg_number: "21CS001".into(),
            subject: "Maths".into(),
            marks: "88".into(),
        });
    }

    #[test]
    fn accepts_reg_and_score_variants() {
        let csv = b"registration_number,sub,score\nR-9,Chem,61\n";
        let rows = parse_grade_csv(csv).unwrap();
        assert_eq!(rows[0].reg_number, "R-9");
        assert_eq!(rows[0].marks, "61");
    }

    #[test]
    fn skips_rows_missing_key_fields() {
        let csv = b"reg,subject,marks\n,Maths,10\n21CS003,Bio,55\n";
        let rows = parse_grade_csv(csv).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reg_number, "21CS003");
    }

    #[test]
    fn rejects_missing_columns_and_empty_files() {
        assert!(parse_grade_csv(b"name,grade\nx,1\n").is_err());
        assert!(parse_grade_csv(b"").is_err());
        assert!(parse_grade_csv(b"reg,subject,marks\n").is_err());
    }

    #[test]
    fn marks_kept_verbatim() {
        let csv = b"reg,subject,marks\n21CS004,History,AB\n";
        let rows = parse_grade_csv(csv).unwrap();
        assert_eq!(rows[0].marks, "AB");
    }
}
