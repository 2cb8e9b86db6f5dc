// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-shot diagnostic commands.  Each talks to the local tools directly,
// without the remote store.

use std::io::Write;

use companion_core::config::AgentConfig;
use companion_core::error::Result;
use companion_core::types::DetectedPrinter;
use companion_devices::{
    CommandPrintBackend, HostInspector, JavaPrinterTools, JavaScaleTools, PrintBackend,
    PrintRequest, PrinterEnumerator, ScaleBackend, SystemHost,
};
use tracing::info;

use crate::test_page;

pub async fn list_printers(config: &AgentConfig) -> Result<()> {
    let tools = JavaPrinterTools::new(&config.config_dir, config.backend_timeout());
    let printers = tools.list_printers().await?;
    print!("{}", printer_table(&printers));
    Ok(())
}

pub async fn read_scales(config: &AgentConfig) -> Result<()> {
    let scale = JavaScaleTools::new(&config.config_dir, config.backend_timeout());
    let grams = scale.read_weight().await?;
    println!("{grams} g");
    Ok(())
}

pub async fn show_info(config: &AgentConfig, app_id: &str) -> Result<()> {
    let host = SystemHost::default().inspect().await;
    println!("Agent id:       {app_id}");
    println!("Version:        {}", companion_core::AGENT_VERSION);
    println!("Config dir:     {}", config.config_dir.display());
    println!("Hostname:       {}", host.hostname);
    println!("OS:             {}", host.operating_system);
    println!(
        "Java:           {}",
        if host.java_version.is_empty() { "not found" } else { host.java_version.as_str() }
    );
    Ok(())
}

pub async fn print_test_page(config: &AgentConfig, app_id: &str, printer: &str) -> Result<()> {
    let pdf = test_page::render(printer, app_id);
    let mut file = tempfile::Builder::new()
        .prefix("companion_test_page_")
        .suffix(".pdf")
        .tempfile()?;
    file.write_all(&pdf)?;
    file.flush()?;

    let backend = CommandPrintBackend::for_host(&config.config_dir, config.backend_timeout());
    backend
        .print(PrintRequest {
            printer,
            tray: "",
            file: file.path(),
            copies: 1,
        })
        .await?;
    info!(printer, "test page sent");
    println!("Test page sent to {printer}");
    Ok(())
}

fn printer_table(printers: &[DetectedPrinter]) -> String {
    if printers.is_empty() {
        return "No printers found.\n".to_string();
    }
    let width = printers
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0)
        .max("PRINTER".len());

    let mut out = format!("{:<width$}  TRAYS\n", "PRINTER");
    for printer in printers {
        let trays = if printer.trays.is_empty() {
            "-".to_string()
        } else {
            printer
                .trays
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.push_str(&format!("{:<width$}  {trays}\n", printer.name));
    }
    out
}
