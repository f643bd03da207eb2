use crate::report::ReportDocument;
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};

/// Turns a `ReportDocument` into a file on disk.
pub trait DocumentRenderer {
    fn format(&self) -> &'static str;
    fn render(&self, doc: &ReportDocument, out_path: &Path) -> anyhow::Result<()>;
}

fn ensure_parent(out_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    Ok(())
}

pub struct TextRenderer;

impl TextRenderer {
    pub fn render_to_string(doc: &ReportDocument) -> String {
        let mut widths: Vec<usize> = doc.columns.iter().map(|c| c.chars().count()).collect();
        for row in &doc.rows {
            for (i, cell) in row.iter().enumerate() {
                let w = cell.chars().count();
                match widths.get_mut(i) {
                    Some(cur) => *cur = (*cur).max(w),
                    None => widths.push(w),
                }
            }
        }
        let fmt_row = |cells: &[String]| -> String {
            cells
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let pad = widths.get(i).copied().unwrap_or(0);
                    format!("{:<width$}", c, width = pad)
                })
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = String::new();
        out.push_str(&doc.title);
        out.push('\n');
        out.push_str(&"=".repeat(doc.title.chars().count()));
        out.push('\n');
        for line in &doc.header_lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        if !doc.columns.is_empty() {
            let header = fmt_row(&doc.columns);
            out.push_str(&header);
            out.push('\n');
            out.push_str(&"-".repeat(header.chars().count()));
            out.push('\n');
        }
        for row in &doc.rows {
            out.push_str(&fmt_row(row));
            out.push('\n');
        }
        if !doc.footer_lines.is_empty() {
            out.push('\n');
            for line in &doc.footer_lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

impl DocumentRenderer for TextRenderer {
    fn format(&self) -> &'static str {
        "text"
    }

    fn render(&self, doc: &ReportDocument, out_path: &Path) -> anyhow::Result<()> {
        ensure_parent(out_path)?;
        std::fs::write(out_path, Self::render_to_string(doc))
            .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))
    }
}

const DEFAULT_FONT_DIRS: [&str; 4] = [
    "/usr/share/fonts/truetype/liberation",
    "/usr/share/fonts/liberation",
    "/usr/share/fonts/TTF",
    "/Library/Fonts",
];
const DEFAULT_FONT_FAMILY: &str = "LiberationSans";

/// Landscape A4 table export through genpdf.
///
/// A family named `F` loads from `F-Regular.ttf`, `F-Bold.ttf`, `F-Italic.ttf` and
/// `F-BoldItalic.ttf` in the font directory. Liberation Sans ships with that layout;
/// families named otherwise (DejaVu's `-Oblique`, for instance) need renamed copies.
pub struct PdfRenderer {
    pub font_dir: Option<PathBuf>,
    pub font_family: Option<String>,
}

impl PdfRenderer {
    fn load_fonts(&self) -> anyhow::Result<genpdf::fonts::FontFamily<genpdf::fonts::FontData>> {
        let dirs: Vec<PathBuf> = match &self.font_dir {
            Some(d) => vec![d.clone()],
            None => DEFAULT_FONT_DIRS.iter().map(PathBuf::from).collect(),
        };
        let family = self.font_family.as_deref().unwrap_or(DEFAULT_FONT_FAMILY);
        dirs.iter()
            .filter(|d| d.is_dir())
            .find_map(|d| genpdf::fonts::from_files(d, family, None).ok())
            .ok_or_else(|| {
                anyhow!(
                    "no usable font family found (looked for {}-Regular.ttf and its bold/italic variants in {:?})",
                    family,
                    dirs
                )
            })
    }
}

impl DocumentRenderer for PdfRenderer {
    fn format(&self) -> &'static str {
        "pdf"
    }

    fn render(&self, doc: &ReportDocument, out_path: &Path) -> anyhow::Result<()> {
        use genpdf::elements::{Break, FrameCellDecorator, Paragraph, TableLayout};
        use genpdf::style::Style;
        use genpdf::Element;

        let fonts = self.load_fonts()?;
        let mut pdf = genpdf::Document::new(fonts);
        pdf.set_title(doc.title.clone());
        pdf.set_paper_size(genpdf::Size::new(297, 210));
        pdf.set_font_size(10);
        let mut decorator = genpdf::SimplePageDecorator::new();
        decorator.set_margins(10);
        pdf.set_page_decorator(decorator);

        pdf.push(Paragraph::new(doc.title.clone()).styled(Style::new().bold().with_font_size(16)));
        for line in &doc.header_lines {
            pdf.push(Paragraph::new(line.clone()));
        }
        pdf.push(Break::new(1.0));

        if !doc.columns.is_empty() {
            let mut table = TableLayout::new(vec![1; doc.columns.len()]);
            table.set_cell_decorator(FrameCellDecorator::new(true, true, false));
            let mut head = table.row();
            for c in &doc.columns {
                head.push_element(
                    Paragraph::new(c.clone()).styled(Style::new().bold().with_font_size(8)),
                );
            }
            head.push().map_err(|e| anyhow!("failed to lay out header row: {}", e))?;
            for row in &doc.rows {
                let mut r = table.row();
                for i in 0..doc.columns.len() {
                    let cell = row.get(i).cloned().unwrap_or_default();
                    r.push_element(Paragraph::new(cell).styled(Style::new().with_font_size(8)));
                }
                r.push().map_err(|e| anyhow!("failed to lay out table row: {}", e))?;
            }
            pdf.push(table);
        }

        for line in &doc.footer_lines {
            pdf.push(Paragraph::new(line.clone()));
        }

        ensure_parent(out_path)?;
        pdf.render_to_file(out_path)
            .map_err(|e| anyhow!("failed to render {}: {}", out_path.to_string_lossy(), e))
    }
}

pub fn renderer_for(
    format: &str,
    font_dir: Option<PathBuf>,
    font_family: Option<String>,
) -> Option<Box<dyn DocumentRenderer>> {
    match format {
        "text" | "txt" => Some(Box::new(TextRenderer)),
        "pdf" => Some(Box::new(PdfRenderer {
            font_dir,
            font_family,
        })),
        _ => None,
    }
}
