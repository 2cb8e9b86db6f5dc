// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-page A4 test document, built with printpdf's op-list API.

use chrono::Utc;
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, TextItem,
};
use tracing::debug;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;

/// Render the test page for `printer`, naming the agent that printed it.
pub fn render(printer: &str, agent_id: &str) -> Vec<u8> {
    let lines = [
        (18.0, "Companion test page".to_string()),
        (11.0, format!("Printer: {printer}")),
        (11.0, format!("Agent: {agent_id}")),
        (11.0, format!("Version: {}", companion_core::AGENT_VERSION)),
        (11.0, format!("Printed: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))),
    ];

    let page_w = Mm(PAGE_WIDTH_MM);
    let page_h = Mm(PAGE_HEIGHT_MM);
    let margin_pt = Mm(MARGIN_MM).into_pt().0;
    let mut y_pt = page_h.into_pt().0 - margin_pt;

    let mut ops = Vec::new();
    for (size, text) in lines {
        ops.push(Op::StartTextSection);
        ops.push(Op::SetTextCursor {
            pos: Point {
                x: Pt(margin_pt),
                y: Pt(y_pt),
            },
        });
        ops.push(Op::SetFontSizeBuiltinFont {
            size: Pt(size),
            font: BuiltinFont::Helvetica,
        });
        ops.push(Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(text)],
            font: BuiltinFont::Helvetica,
        });
        ops.push(Op::EndTextSection);
        y_pt -= size * 1.6;
    }

    let mut doc = PdfDocument::new("Companion test page");
    doc.with_pages(vec![PdfPage::new(page_w, page_h, ops)]);

    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
    debug!(bytes = output.len(), warnings = warnings.len(), "rendered test page");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_pdf() {
        let pdf = render("Zebra ZD420", "agent-1");
        assert!(pdf.starts_with(b"%PDF"));
        assert!(pdf.len() > 200);
    }
}
