//! Named fields of the grounding-check form. Names match the PDF byte for byte.

/// One inspected item and its pair of marker fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemFields {
    pub question_id: &'static str,
    pub ok_field: &'static str,
    pub not_ok_field: &'static str,
    pub location_code: &'static str,
    pub label: &'static str,
}

/// One row of the remarks table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemarkSlot {
    pub punkt_field: &'static str,
    pub bemerkung_field: &'static str,
}

const fn item(
    question_id: &'static str,
    ok_field: &'static str,
    not_ok_field: &'static str,
    location_code: &'static str,
    label: &'static str,
) -> ItemFields {
    ItemFields {
        question_id,
        ok_field,
        not_ok_field,
        location_code,
        label,
    }
}

pub const ITEM_FIELDS: &[ItemFields] = &[
    item("G01", "MR_Hauptschalter_iO", "MR_Hauptschalter_niO", "1.1", "Hauptschalter Maschinenraum"),
    item("G02", "MR_Schaltschrank_iO", "MR_Schaltschrank_niO", "1.2", "Schaltschrank"),
    item("G03", "MR_Antrieb_iO", "MR_Antrieb_niO", "1.3", "Antriebsmaschine"),
    item("G04", "MR_Bremse_iO", "MR_Bremse_niO", "1.4", "Bremsmagnet"),
    item("G05", "MR_Geschwindigkeitsbegrenzer_iO", "MR_Geschwindigkeitsbegrenzer_niO", "1.5", "Geschwindigkeitsbegrenzer"),
    item("G06", "FK_Kabinendach_iO", "FK_Kabinendach_niO", "2.1", "Kabinendach"),
    item("G07", "FK_Kabinentableau_iO", "FK_Kabinentableau_niO", "2.2", "Kabinentableau"),
    item("G08", "FK_Kabinentuer_iO", "FK_Kabinentuer_niO", "2.3", "Kabinentür"),
    item("G09", "FK_Haengekabel_iO", "FK_Haengekabel_niO", "2.4", "Hängekabel"),
    item("G10", "SG_Schachtgrube_iO", "SG_Schachtgrube_niO", "3.1", "Schachtgrube"),
    item("G11", "SG_Puffer_iO", "SG_Puffer_niO", "3.2", "Puffer"),
    item("G12", "SG_Spannrolle_iO", "SG_Spannrolle_niO", "3.3", "Spanngewicht Begrenzerseil"),
    item("G13", "ST_Schachttueren_iO", "ST_Schachttueren_niO", "4.1", "Schachttüren"),
    item("G14", "ST_Fuehrungsschienen_iO", "ST_Fuehrungsschienen_niO", "4.2", "Führungsschienen"),
    item("G15", "ST_Potentialausgleich_iO", "ST_Potentialausgleich_niO", "4.3", "Potentialausgleich"),
];

/// Application data key -> form field name.
pub const METADATA_FIELDS: &[(&str, &str)] = &[
    ("inspector", "Pruefer"),
    ("installation", "Anlage"),
    ("address", "Standort"),
    ("customer", "Kunde"),
    ("orderNumber", "Auftragsnummer"),
    ("date", "Datum"),
    ("measuredResistance", "Schleifenwiderstand"),
];

pub const REMARK_SLOTS: &[RemarkSlot] = &[
    RemarkSlot { punkt_field: "Punkt1", bemerkung_field: "Bemerkung1" },
    RemarkSlot { punkt_field: "Punkt2", bemerkung_field: "Bemerkung2" },
    RemarkSlot { punkt_field: "Punkt3", bemerkung_field: "Bemerkung3" },
    RemarkSlot { punkt_field: "Punkt4", bemerkung_field: "Bemerkung4" },
    RemarkSlot { punkt_field: "Punkt5", bemerkung_field: "Bemerkung5" },
    RemarkSlot { punkt_field: "Punkt6", bemerkung_field: "Bemerkung6" },
    RemarkSlot { punkt_field: "Punkt7", bemerkung_field: "Bemerkung7" },
    RemarkSlot { punkt_field: "Punkt8", bemerkung_field: "Bemerkung8" },
    RemarkSlot { punkt_field: "Punkt9", bemerkung_field: "Bemerkung9" },
    RemarkSlot { punkt_field: "Punkt10", bemerkung_field: "Bemerkung10" },
];

pub const OK_MARKER: &str = "X";
pub const NOT_APPLICABLE_MARKER: &str = "-";

pub fn item_fields(question_id: &str) -> Option<&'static ItemFields> {
    ITEM_FIELDS.iter().find(|item| item.question_id == question_id)
}

pub fn metadata_field(key: &str) -> Option<&'static str> {
    METADATA_FIELDS
        .iter()
        .find(|(app_key, _)| *app_key == key)
        .map(|(_, field)| *field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_are_unique() {
        let mut seen = HashSet::new();
        for item in ITEM_FIELDS {
            assert!(seen.insert(item.ok_field), "{}", item.ok_field);
            assert!(seen.insert(item.not_ok_field), "{}", item.not_ok_field);
        }
        for (_, field) in METADATA_FIELDS {
            assert!(seen.insert(*field), "{}", field);
        }
        for slot in REMARK_SLOTS {
            assert!(seen.insert(slot.punkt_field));
            assert!(seen.insert(slot.bemerkung_field));
        }
    }

    #[test]
    fn test_lookup_is_exact() {
        assert_eq!(item_fields("G04").map(|i| i.location_code), Some("1.4"));
        assert!(item_fields("g04").is_none());
        assert_eq!(metadata_field("inspector"), Some("Pruefer"));
        assert!(metadata_field("Inspector").is_none());
    }
}
