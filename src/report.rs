use crate::calc::{self, CorrectionStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SEPARATOR_WIDTH: usize = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRecord {
    pub anonymous_id: String,
    pub score: f64,
    pub comments: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResultRecord {
    pub copy_id: String,
    pub matricule: String,
    pub centre: String,
    pub professor_firstname: String,
    pub professor_lastname: String,
    pub institution: String,
    pub scores: Vec<SubjectScore>,
    pub average: f64,
    pub mention: String,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
}

impl ExamResultRecord {
    pub fn professor(&self) -> String {
        format!("{} {}", self.professor_firstname, self.professor_lastname)
            .trim()
            .to_string()
    }

    fn score_for(&self, subject: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.subject == subject)
            .map(|s| s.score)
    }
}

#[derive(Debug, Clone)]
pub struct ResultSheet {
    pub lastname: String,
    pub firstname: String,
    pub matricule: String,
    pub scores: Vec<SubjectScore>,
    pub average: f64,
    pub status: String,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct CodeRecord {
    pub code: String,
    pub type_label: String,
    pub generated_at: DateTime<Utc>,
    pub used: bool,
}

/// Table-shaped document handed to a `DocumentRenderer`.
#[derive(Debug, Clone, Default)]
pub struct ReportDocument {
    pub title: String,
    pub header_lines: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub footer_lines: Vec<String>,
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| csv_quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Reads records written by this module. Quoted fields may span lines.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            field_started = true;
            i += 1;
            continue;
        }
        if !in_quotes && ch == ',' {
            record.push(std::mem::take(&mut buf));
            field_started = true;
            i += 1;
            continue;
        }
        if !in_quotes && (ch == '\n' || ch == '\r') {
            if ch == '\r' && i + 1 < chars.len() && chars[i + 1] == '\n' {
                i += 1;
            }
            if field_started || !buf.is_empty() {
                record.push(std::mem::take(&mut buf));
                records.push(std::mem::take(&mut record));
            }
            field_started = false;
            i += 1;
            continue;
        }
        buf.push(ch);
        field_started = true;
        i += 1;
    }
    if field_started || !buf.is_empty() {
        record.push(buf);
        records.push(record);
    }
    records
}

pub fn format_score(v: f64) -> String {
    v.to_string()
}

/// `toLocaleString('fr-FR')` shape.
pub fn french_datetime(t: DateTime<Utc>) -> String {
    t.format("%d/%m/%Y %H:%M:%S").to_string()
}

pub fn french_date(t: DateTime<Utc>) -> String {
    t.format("%d/%m/%Y").to_string()
}

pub fn iso_date(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d").to_string()
}

pub fn corrections_csv_filename(t: DateTime<Utc>) -> String {
    format!("corrections_{}.csv", iso_date(t))
}

pub fn results_csv_filename(t: DateTime<Utc>) -> String {
    format!("resultats-copies_{}.csv", iso_date(t))
}

pub fn detailed_report_filename(t: DateTime<Utc>) -> String {
    format!("rapport_detaille_{}.txt", iso_date(t))
}

pub fn results_pdf_filename(t: DateTime<Utc>) -> String {
    format!("rapport-resultats_{}.pdf", iso_date(t))
}

pub fn codes_csv_filename(t: DateTime<Utc>) -> String {
    format!("codes_{}.csv", iso_date(t))
}

pub fn result_sheet_filename(sheet: &ResultSheet) -> String {
    format!(
        "resultats_{}_{}_{}.txt",
        sheet.matricule, sheet.lastname, sheet.firstname
    )
}

pub fn corrections_to_csv(records: &[CorrectionRecord]) -> String {
    let mut out = csv_line(["ID Anonyme", "Note", "Commentaires", "Fichier"]);
    for r in records {
        out.push('\n');
        out.push_str(&csv_line([
            r.anonymous_id.as_str(),
            format_score(r.score).as_str(),
            r.comments.as_str(),
            r.filename.as_str(),
        ]));
    }
    out
}

/// Subject columns in first-seen order across all records.
fn subject_columns(records: &[ExamResultRecord]) -> Vec<String> {
    let mut subjects: Vec<String> = Vec::new();
    for r in records {
        for s in &r.scores {
            if !subjects.iter().any(|x| x == &s.subject) {
                subjects.push(s.subject.clone());
            }
        }
    }
    subjects
}

pub fn results_to_csv(records: &[ExamResultRecord]) -> String {
    let subjects = subject_columns(records);
    let mut header: Vec<String> = vec![
        "ID Copie".into(),
        "Matricule Étudiant".into(),
        "Centre Composition".into(),
        "Professeur".into(),
        "Établissement Professeur".into(),
    ];
    header.extend(subjects.iter().cloned());
    header.extend([
        "Moyenne".to_string(),
        "Mention".to_string(),
        "Statut".to_string(),
        "Date".to_string(),
    ]);

    let mut out = csv_line(&header);
    for r in records {
        let mut row: Vec<String> = vec![
            r.copy_id.clone(),
            r.matricule.clone(),
            r.centre.clone(),
            r.professor(),
            r.institution.clone(),
        ];
        for subject in &subjects {
            row.push(r.score_for(subject).map(format_score).unwrap_or_default());
        }
        row.push(format!("{:.2}", r.average));
        row.push(r.mention.clone());
        row.push(r.status.clone());
        row.push(french_datetime(r.recorded_at));
        out.push('\n');
        out.push_str(&csv_line(&row));
    }
    out
}

fn stats_block(stats: Option<&CorrectionStats>) -> String {
    let Some(s) = stats else {
        return "Aucune correction enregistrée.\n".to_string();
    };
    format!(
        "Nombre total de copies : {}\n\
         Note moyenne : {:.2}/20\n\
         Note maximale : {}/20\n\
         Note minimale : {}/20\n\
         Taux de réussite : {:.1}%\n",
        s.count,
        s.average,
        format_score(s.max),
        format_score(s.min),
        s.pass_rate
    )
}

pub fn corrections_detailed_report(
    records: &[CorrectionRecord],
    generated_at: DateTime<Utc>,
    pass_threshold: f64,
) -> String {
    let scores: Vec<f64> = records.iter().map(|r| r.score).collect();
    let stats = calc::correction_stats(&scores, pass_threshold);

    let mut out = String::new();
    out.push_str("RAPPORT DE CORRECTION DÉTAILLÉ\n");
    out.push_str("================================\n\n");
    out.push_str(&format!(
        "Date de génération : {}\n\n",
        french_datetime(generated_at)
    ));
    out.push_str("STATISTIQUES GÉNÉRALES\n");
    out.push_str("----------------------\n");
    out.push_str(&stats_block(stats.as_ref()));
    out.push('\n');
    out.push_str("DÉTAIL DES CORRECTIONS\n");
    out.push_str("======================\n");
    for r in records {
        out.push('\n');
        out.push_str(&format!("ID Anonyme : {}\n", r.anonymous_id));
        out.push_str(&format!("Note : {}/20\n", format_score(r.score)));
        out.push_str(&format!("Fichier : {}\n", r.filename));
        out.push_str(&format!("Commentaires : {}\n", r.comments));
        out.push_str(&"=".repeat(SEPARATOR_WIDTH));
        out.push('\n');
    }
    out
}

pub fn result_sheet_text(sheet: &ResultSheet, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("RÉSULTATS DE L'ÉTUDIANT\n\n");
    out.push_str(&format!("Nom: {}\n", sheet.lastname));
    out.push_str(&format!("Prénom: {}\n", sheet.firstname));
    out.push_str(&format!("Matricule: {}\n\n", sheet.matricule));
    out.push_str("NOTES:\n");
    for s in &sheet.scores {
        out.push_str(&format!("- {}: {}/20\n", s.subject, format_score(s.score)));
    }
    out.push_str(&format!(
        "\nMOYENNE: {}/20\n\n",
        format_score(calc::round_off_2_decimals(sheet.average))
    ));
    out.push_str(&format!("RÉSULTAT: {}\n", sheet.status.to_uppercase()));
    out.push_str(if sheet.passed {
        "Félicitations!\n"
    } else {
        "Échec - Rattrapage nécessaire\n"
    });
    out.push_str(&format!(
        "\nDate de génération: {}\n",
        french_date(generated_at)
    ));
    out
}

pub fn codes_to_csv(codes: &[CodeRecord]) -> String {
    let mut out = csv_line(["Code", "Type", "Date de génération", "Statut"]);
    for c in codes {
        out.push('\n');
        out.push_str(&csv_line([
            c.code.as_str(),
            c.type_label.as_str(),
            french_datetime(c.generated_at).as_str(),
            if c.used { "Utilisé" } else { "Disponible" },
        ]));
    }
    out
}

pub fn results_document(records: &[ExamResultRecord], generated_at: DateTime<Utc>) -> ReportDocument {
    let subjects = subject_columns(records);
    let mut columns: Vec<String> = vec!["ID".into(), "Matricule".into(), "Centre".into()];
    columns.extend(subjects.iter().cloned());
    columns.extend(["Moyenne".to_string(), "Mention".to_string(), "Statut".to_string()]);

    let mut header_lines = Vec::new();
    if let Some(first) = records.first() {
        header_lines.push(format!("Professeur: {}", first.professor()));
        header_lines.push(format!("Établissement: {}", first.institution));
    }
    header_lines.push(format!("Généré le: {}", french_date(generated_at)));

    let rows = records
        .iter()
        .map(|r| {
            let mut row = vec![r.copy_id.clone(), r.matricule.clone(), r.centre.clone()];
            for subject in &subjects {
                row.push(r.score_for(subject).map(format_score).unwrap_or_default());
            }
            row.push(format!("{:.2}", r.average));
            row.push(r.mention.clone());
            row.push(r.status.clone());
            row
        })
        .collect();

    ReportDocument {
        title: "Rapport des Résultats d'Examen".to_string(),
        header_lines,
        columns,
        rows,
        footer_lines: vec![format!("{} copie(s)", records.len())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).single().expect("valid date")
    }

    fn correction(anon: &str, score: f64, comments: &str) -> CorrectionRecord {
        CorrectionRecord {
            anonymous_id: anon.to_string(),
            score,
            comments: comments.to_string(),
            filename: format!("{}.pdf", anon.to_ascii_lowercase()),
        }
    }

    #[test]
    fn quoted_comment_survives_csv_roundtrip() {
        let records = vec![
            correction("ANON-ABC123", 15.0, "He said \"hi\""),
            correction("ANON-DEF456", 12.5, "ligne 1\nligne 2, suite"),
        ];
        let csv = corrections_to_csv(&records);
        let parsed = parse_csv(&csv);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], vec!["ID Anonyme", "Note", "Commentaires", "Fichier"]);
        assert_eq!(parsed[1][2], "He said \"hi\"");
        assert_eq!(parsed[1][1], "15");
        assert_eq!(parsed[2][1], "12.5");
        assert_eq!(parsed[2][2], "ligne 1\nligne 2, suite");
    }

    #[test]
    fn csv_quote_only_when_needed() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"x\""), "\"say \"\"x\"\"\"");
    }

    #[test]
    fn parse_csv_keeps_empty_trailing_fields() {
        let rows = parse_csv("a,,c,\r\n1,2,3,4\n");
        assert_eq!(rows, vec![vec!["a", "", "c", ""], vec!["1", "2", "3", "4"]]);
    }

    #[test]
    fn detailed_report_has_stats_and_blocks() {
        let records = vec![
            correction("ANON-A", 15.0, "Très bon travail"),
            correction("ANON-B", 8.0, "Insuffisant"),
        ];
        let text = corrections_detailed_report(&records, at(), 10.0);
        assert!(text.contains("Date de génération : 09/03/2026 14:05:07"));
        assert!(text.contains("Nombre total de copies : 2"));
        assert!(text.contains("Note moyenne : 11.50/20"));
        assert!(text.contains("Note maximale : 15/20"));
        assert!(text.contains("Note minimale : 8/20"));
        assert!(text.contains("Taux de réussite : 50.0%"));
        assert!(text.contains("ID Anonyme : ANON-B"));
        assert_eq!(text.matches(&"=".repeat(SEPARATOR_WIDTH)).count(), 2);
    }

    #[test]
    fn detailed_report_for_no_records() {
        let text = corrections_detailed_report(&[], at(), 10.0);
        assert!(text.contains("Aucune correction enregistrée."));
        assert!(!text.contains("NaN"));
    }

    #[test]
    fn results_csv_uses_subject_union_and_two_decimals() {
        let r1 = ExamResultRecord {
            copy_id: "LOYW3V28-AB12C".into(),
            matricule: "12345678A".into(),
            centre: "Lycée Central".into(),
            professor_firstname: "Awa".into(),
            professor_lastname: "Diallo".into(),
            institution: "Lycée Moderne".into(),
            scores: vec![
                SubjectScore { subject: "maths".into(), score: 18.0 },
                SubjectScore { subject: "francais".into(), score: 12.0 },
            ],
            average: 15.0,
            mention: "Bien".into(),
            status: "ADMIS".into(),
            recorded_at: at(),
        };
        let mut r2 = r1.clone();
        r2.copy_id = "LOYW3V28-ZZ999".into();
        r2.scores = vec![SubjectScore { subject: "anglais".into(), score: 9.5 }];
        r2.average = 9.5;

        let rows = parse_csv(&results_to_csv(&[r1, r2]));
        assert_eq!(rows.len(), 3);
        let header = &rows[0];
        assert_eq!(&header[5..8], &["maths", "francais", "anglais"]);
        assert_eq!(rows[1][3], "Awa Diallo");
        assert_eq!(rows[1][8], "15.00");
        assert_eq!(rows[2][5], "");
        assert_eq!(rows[2][7], "9.5");
        assert_eq!(results_csv_filename(at()), "resultats-copies_2026-03-09.csv");
    }

    #[test]
    fn result_sheet_text_and_filename() {
        let sheet = ResultSheet {
            lastname: "Kone".into(),
            firstname: "Ibrahim".into(),
            matricule: "87654321B".into(),
            scores: vec![
                SubjectScore { subject: "Note 1".into(), score: 8.0 },
                SubjectScore { subject: "Note 2".into(), score: 9.0 },
            ],
            average: 8.5,
            status: "echec".into(),
            passed: false,
        };
        let text = result_sheet_text(&sheet, at());
        assert!(text.contains("MOYENNE: 8.5/20"));
        assert!(text.contains("RÉSULTAT: ECHEC"));
        assert!(text.contains("Échec - Rattrapage nécessaire"));
        assert!(text.contains("Date de génération: 09/03/2026"));
        assert_eq!(result_sheet_filename(&sheet), "resultats_87654321B_Kone_Ibrahim.txt");
    }

    #[test]
    fn codes_csv_marks_usage() {
        let csv = codes_to_csv(&[CodeRecord {
            code: "CORR-LOYW3V28-ABC123".into(),
            type_label: "Code Correcteur".into(),
            generated_at: at(),
            used: false,
        }]);
        let rows = parse_csv(&csv);
        assert_eq!(rows[1], vec!["CORR-LOYW3V28-ABC123", "Code Correcteur", "09/03/2026 14:05:07", "Disponible"]);
    }
}
