// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document class to printer target resolution.

use companion_core::error::{CompanionError, Result};
use companion_core::types::{DocumentClass, PrinterTarget, Printers};

/// The configured target for `class`, if it can print anywhere.
pub fn resolve_target(printers: &Printers, class: DocumentClass) -> Result<PrinterTarget> {
    let target = printers.get(class);
    if !target.is_usable() {
        return Err(CompanionError::NoPrinterConfigured(class.to_string()));
    }
    Ok(target.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_class_only() {
        let mut printers = Printers::default();
        printers.label_small = PrinterTarget {
            reference: "Zebra".into(),
            tray: "T2".into(),
            ..Default::default()
        };

        let target = resolve_target(&printers, DocumentClass::LabelSmall).unwrap();
        assert_eq!(target.reference, "Zebra");
        assert_eq!(target.tray, "T2");

        let err = resolve_target(&printers, DocumentClass::GiftNote).unwrap_err();
        assert!(matches!(err, CompanionError::NoPrinterConfigured(class) if class == "gift_note"));
    }

    #[test]
    fn forwarding_only_target_is_usable() {
        let mut printers = Printers::default();
        printers.document.forwarding = "http://10.0.0.9:62222".into();
        assert!(resolve_target(&printers, DocumentClass::Document).is_ok());
    }

    #[test]
    fn name_and_tray_alone_are_not_enough() {
        let mut printers = Printers::default();
        printers.label_large.name = "Big labels".into();
        printers.label_large.tray = "Roll".into();
        assert!(resolve_target(&printers, DocumentClass::LabelLarge).is_err());
    }
}
