//! Static field-type catalog.
//!
//! The registry maps a field-type identifier to the construction parameters
//! an editable field of that type accepts. It is a fixed table compiled into
//! the binary: adding a field type means adding a catalog entry here, and the
//! registry is read-only at runtime.

use crate::model::OptionEntry;

/// Type identifier assigned when none is specified (matches the table default).
pub const DEFAULT_TYPE: &str = "input-text";

/// Field types whose value holds external attachment references.
pub const FILE_TYPES: &[&str] = &["picture", "upload", "cropper"];

/// Internal field types hidden from the user-facing type selector.
const INTERNAL_TYPES: &[&str] = &["hidden", "label"];

/// A construction parameter accepted by a field type.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: &'static str,
    /// Default literal value, possibly empty.
    pub param_str: &'static str,
    /// Display signature.
    pub full: &'static str,
    /// Raw definition line the signature was taken from.
    pub raw: &'static str,
    /// Whether the parameter is applied by default on new settings.
    pub active: bool,
}

/// Registry entry describing one field type.
#[derive(Debug, Clone, Copy)]
pub struct FieldTypeDescriptor {
    /// Stable type identifier stored in the `type` column.
    pub id: &'static str,
    /// Display name shown in the type selector.
    pub name: &'static str,
    /// Construction parameters applicable to this type.
    pub methods: &'static [ParamSpec],
}

macro_rules! param {
    ($name:literal, $default:literal, $sig:literal) => {
        ParamSpec {
            name: $name,
            param_str: $default,
            full: $sig,
            raw: concat!("fn ", $sig),
            active: false,
        }
    };
    (active $name:literal, $default:literal, $sig:literal) => {
        ParamSpec {
            name: $name,
            param_str: $default,
            full: $sig,
            raw: concat!("fn ", $sig),
            active: true,
        }
    };
}

static CATALOG: &[FieldTypeDescriptor] = &[
    FieldTypeDescriptor {
        id: "input-text",
        name: "Text input",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("placeholder", "", "placeholder(value: &str)"),
            param!("required", "false", "required(required: bool)"),
            param!("mask", "", "mask(pattern: &str)"),
            param!("max", "", "max(value: i64)"),
            param!("maxlength", "", "maxlength(value: u32)"),
        ],
    },
    FieldTypeDescriptor {
        id: "textarea",
        name: "Text area",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("placeholder", "", "placeholder(value: &str)"),
            param!("required", "false", "required(required: bool)"),
            param!("rows", "5", "rows(count: u32)"),
        ],
    },
    FieldTypeDescriptor {
        id: "select",
        name: "Select",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("options", "[]", "options(options: &[(&str, &str)])"),
            param!("multiple", "false", "multiple(multiple: bool)"),
            param!("empty", "", "empty(label: &str)"),
        ],
    },
    FieldTypeDescriptor {
        id: "checkbox",
        name: "Checkbox",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("placeholder", "", "placeholder(value: &str)"),
            param!("send_true_or_false", "true", "send_true_or_false(enabled: bool)"),
        ],
    },
    FieldTypeDescriptor {
        id: "switcher",
        name: "Switcher",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("send_true_or_false", "true", "send_true_or_false(enabled: bool)"),
        ],
    },
    FieldTypeDescriptor {
        id: "datetime",
        name: "Date & time",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("format", "\"Y-m-d H:i\"", "format(format: &str)"),
            param!("enable_time", "true", "enable_time(enabled: bool)"),
            param!("allow_input", "false", "allow_input(enabled: bool)"),
        ],
    },
    FieldTypeDescriptor {
        id: "rich-text",
        name: "Rich text",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("required", "false", "required(required: bool)"),
            param!(
                "toolbar",
                "[\"text\", \"color\", \"header\", \"list\", \"format\", \"media\"]",
                "toolbar(groups: &[&str])"
            ),
        ],
    },
    FieldTypeDescriptor {
        id: "code",
        name: "Code editor",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("language", "\"javascript\"", "language(language: &str)"),
            param!("line_numbers", "true", "line_numbers(enabled: bool)"),
        ],
    },
    FieldTypeDescriptor {
        id: "password",
        name: "Password",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("placeholder", "", "placeholder(value: &str)"),
            param!("required", "false", "required(required: bool)"),
        ],
    },
    FieldTypeDescriptor {
        id: "range",
        name: "Range",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("min", "0", "min(value: i64)"),
            param!("max", "100", "max(value: i64)"),
            param!("step", "1", "step(value: i64)"),
        ],
    },
    FieldTypeDescriptor {
        id: "picture",
        name: "Picture",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("width", "", "width(pixels: u32)"),
            param!("height", "", "height(pixels: u32)"),
            param!("targets", "\"url\"", "targets(target: &str)"),
        ],
    },
    FieldTypeDescriptor {
        id: "upload",
        name: "Upload",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("groups", "", "groups(group: &str)"),
            param!("maximum_file_size", "2", "maximum_file_size(megabytes: u32)"),
            param!("accepted_files", "", "accepted_files(pattern: &str)"),
        ],
    },
    FieldTypeDescriptor {
        id: "cropper",
        name: "Cropper",
        methods: &[
            param!(active "title", "", "title(value: &str)"),
            param!("width", "", "width(pixels: u32)"),
            param!("height", "", "height(pixels: u32)"),
            param!("targets", "\"url\"", "targets(target: &str)"),
        ],
    },
    FieldTypeDescriptor {
        id: "hidden",
        name: "Hidden",
        methods: &[param!("value", "", "value(value: &str)")],
    },
    FieldTypeDescriptor {
        id: "label",
        name: "Label",
        methods: &[param!(active "title", "", "title(value: &str)")],
    },
];

/// Look up a field type by identifier.
#[must_use]
pub fn lookup(type_id: &str) -> Option<&'static FieldTypeDescriptor> {
    CATALOG.iter().find(|descriptor| descriptor.id == type_id)
}

/// Every registered field type, internal ones included.
#[must_use]
pub fn all() -> &'static [FieldTypeDescriptor] {
    CATALOG
}

/// Field types offered in the user-facing type selector.
pub fn selectable() -> impl Iterator<Item = &'static FieldTypeDescriptor> {
    CATALOG
        .iter()
        .filter(|descriptor| !INTERNAL_TYPES.contains(&descriptor.id))
}

/// Whether the identified field type stores attachment references.
#[must_use]
pub fn is_file_field(type_id: &str) -> bool {
    FILE_TYPES.contains(&type_id)
}

/// Build the default editable options for a new setting of the given type.
///
/// Unknown identifiers fall back to the default input type, so a caller can
/// always pre-populate a creation form.
#[must_use]
pub fn default_options(type_id: &str) -> Vec<OptionEntry> {
    let descriptor = lookup(type_id)
        .or_else(|| lookup(DEFAULT_TYPE))
        .unwrap_or(&CATALOG[0]);
    descriptor
        .methods
        .iter()
        .map(|method| OptionEntry {
            active: method.active,
            name: method.name.to_string(),
            param: method.param_str.to_string(),
            full: method.full.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_known_types() {
        let input = lookup("input-text").expect("default type should be registered");
        assert_eq!(input.name, "Text input");
        assert!(lookup("no-such-type").is_none());
    }

    #[test]
    fn selectable_excludes_internal_types() {
        let ids: Vec<_> = selectable().map(|descriptor| descriptor.id).collect();
        assert!(ids.contains(&"input-text"));
        assert!(ids.contains(&"upload"));
        assert!(!ids.contains(&"hidden"));
        assert!(!ids.contains(&"label"));
        assert_eq!(ids.len(), all().len() - INTERNAL_TYPES.len());
    }

    #[test]
    fn file_fields_cover_attachment_types() {
        assert!(is_file_field("picture"));
        assert!(is_file_field("upload"));
        assert!(is_file_field("cropper"));
        assert!(!is_file_field("input-text"));
    }

    #[test]
    fn default_options_activate_only_the_title() {
        let options = default_options("textarea");
        assert_eq!(options.len(), 4);
        let active: Vec<_> = options
            .iter()
            .filter(|option| option.active)
            .map(|option| option.name.as_str())
            .collect();
        assert_eq!(active, vec!["title"]);
        assert_eq!(options[3].name, "rows");
        assert_eq!(options[3].param, "5");
    }

    #[test]
    fn default_options_fall_back_to_input() {
        let fallback = default_options("no-such-type");
        let input = default_options(DEFAULT_TYPE);
        assert_eq!(fallback.len(), input.len());
        assert_eq!(fallback[0].name, input[0].name);
    }
}
