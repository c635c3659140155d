//! Class families and the endpoint paths the service exposes for them.
//!
//! Vowels, digits and arithmetic operators share one coordinator; a
//! [`ClassFamily`] value carries everything that differs between them.

use serde::{Deserialize, Serialize};

/// Identifier of a trainable class family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FamilyId {
    /// Hand shapes for the vowels `a e i o u` (default).
    #[default]
    Vowels,
    /// Hand shapes for the digits `0` through `9`.
    Numbers,
    /// Hand shapes for `+ - * /`.
    Operators,
}

impl FamilyId {
    /// All families, in display order.
    pub const ALL: [Self; 3] = [Self::Vowels, Self::Numbers, Self::Operators];

    /// Path segment and payload key used by the service.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Vowels => "vocales",
            Self::Numbers => "numeros",
            Self::Operators => "operaciones",
        }
    }

    /// Singular noun used in status messages ("vowel 'a'").
    #[must_use]
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Vowels => "vowel",
            Self::Numbers => "number",
            Self::Operators => "operation",
        }
    }

    /// Key of the current-shape statistics payload.
    #[must_use]
    pub const fn stats_key(self) -> &'static str {
        match self {
            Self::Vowels => "estadisticas_vocales",
            Self::Numbers => "estadisticas_numeros",
            Self::Operators => "estadisticas_operaciones",
        }
    }

    /// Keys under which older service versions reported progress.
    #[must_use]
    pub const fn legacy_stats_keys(self) -> &'static [&'static str] {
        match self {
            Self::Vowels => &["vocales"],
            Self::Numbers => &["numeros"],
            Self::Operators => &["operaciones", "operaciones_basicas"],
        }
    }

    /// Wire labels of this family, in display order.
    #[must_use]
    pub const fn labels(self) -> &'static [&'static str] {
        match self {
            Self::Vowels => &["a", "e", "i", "o", "u"],
            Self::Numbers => &["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"],
            Self::Operators => &["mas", "menos", "multiplicacion", "division"],
        }
    }

    /// Parses a family name, case-insensitively. Accepts the wire names and
    /// their English equivalents.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vocales" | "vowels" => Some(Self::Vowels),
            "numeros" | "números" | "numbers" => Some(Self::Numbers),
            "operaciones" | "operations" | "operators" => Some(Self::Operators),
            _ => None,
        }
    }
}

impl std::fmt::Display for FamilyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

impl<'de> Deserialize<'de> for FamilyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid family '{s}': expected one of 'vocales', 'numeros', 'operaciones'"
            ))
        })
    }
}

impl Serialize for FamilyId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.wire_name())
    }
}

/// Opaque identifier of a gesture class within a family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabel(String);

impl ClassLabel {
    /// Wraps a label without checking it against any family.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Returns the wire spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form for operators (`mas` shows as `+`); other labels are
    /// shown as-is.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self.0.as_str() {
            "mas" => "+",
            "menos" => "-",
            "multiplicacion" => "*",
            "division" => "/",
            other => other,
        }
    }
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClassLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn default_stats_endpoint() -> String {
    "estadisticas".to_string()
}

fn default_collect_endpoint() -> String {
    "recolectar".to_string()
}

fn default_predict_endpoint() -> String {
    "prediccion".to_string()
}

fn default_train_endpoint() -> String {
    "entrenar".to_string()
}

fn default_data_endpoint() -> String {
    "datos".to_string()
}

fn default_model_endpoint() -> String {
    "modelo".to_string()
}

/// Path segments appended to `/{family}` for each service operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTemplates {
    /// `GET /{family}/{stats}`.
    #[serde(default = "default_stats_endpoint")]
    pub stats: String,
    /// `POST /{family}/{collect}/{label}`.
    #[serde(default = "default_collect_endpoint")]
    pub collect: String,
    /// `POST /{family}/{predict}[/{label}]`.
    #[serde(default = "default_predict_endpoint")]
    pub predict: String,
    /// `POST /{family}/{train}[/{label}]`.
    #[serde(default = "default_train_endpoint")]
    pub train: String,
    /// `DELETE /{family}/{data}/{label}`.
    #[serde(default = "default_data_endpoint")]
    pub data: String,
    /// `DELETE /{family}/{model}/{label}`.
    #[serde(default = "default_model_endpoint")]
    pub model: String,
}

impl Default for EndpointTemplates {
    fn default() -> Self {
        Self {
            stats: default_stats_endpoint(),
            collect: default_collect_endpoint(),
            predict: default_predict_endpoint(),
            train: default_train_endpoint(),
            data: default_data_endpoint(),
            model: default_model_endpoint(),
        }
    }
}

impl EndpointTemplates {
    /// Returns the name of the first empty template, if any.
    #[must_use]
    pub fn first_empty(&self) -> Option<&'static str> {
        [
            ("stats", &self.stats),
            ("collect", &self.collect),
            ("predict", &self.predict),
            ("train", &self.train),
            ("data", &self.data),
            ("model", &self.model),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// A family instantiated with its label set and endpoint templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFamily {
    id: FamilyId,
    labels: Vec<ClassLabel>,
    endpoints: EndpointTemplates,
}

impl ClassFamily {
    /// Creates a family with the default endpoint templates.
    #[must_use]
    pub fn new(id: FamilyId) -> Self {
        Self::with_endpoints(id, EndpointTemplates::default())
    }

    /// Creates a family with custom endpoint templates.
    #[must_use]
    pub fn with_endpoints(id: FamilyId, endpoints: EndpointTemplates) -> Self {
        Self {
            id,
            labels: id.labels().iter().map(|l| ClassLabel::new(*l)).collect(),
            endpoints,
        }
    }

    /// Which family this is.
    #[must_use]
    pub const fn id(&self) -> FamilyId {
        self.id
    }

    /// Labels in display order.
    #[must_use]
    pub fn labels(&self) -> &[ClassLabel] {
        &self.labels
    }

    /// Endpoint names used to build request paths.
    #[must_use]
    pub const fn endpoints(&self) -> &EndpointTemplates {
        &self.endpoints
    }

    /// Resolves user input to a label of this family, ignoring case and
    /// surrounding whitespace. Operator symbols (`+`, `-`, `*`, `/`) resolve
    /// to their operator label.
    #[must_use]
    pub fn parse_label(&self, input: &str) -> Option<ClassLabel> {
        let needle = input.trim().to_lowercase();
        self.labels
            .iter()
            .find(|label| label.as_str() == needle || label.symbol() == needle)
            .cloned()
    }

    /// Returns `true` if `label` belongs to this family.
    #[must_use]
    pub fn contains(&self, label: &ClassLabel) -> bool {
        self.labels.contains(label)
    }

    fn path(&self, endpoint: &str, label: Option<&ClassLabel>) -> String {
        match label {
            Some(label) => format!("{}/{endpoint}/{label}", self.id.wire_name()),
            None => format!("{}/{endpoint}", self.id.wire_name()),
        }
    }

    /// Path of the statistics endpoint.
    #[must_use]
    pub fn stats_path(&self) -> String {
        self.path(&self.endpoints.stats, None)
    }

    /// Path that stores one sample of `label`.
    #[must_use]
    pub fn collect_path(&self, label: &ClassLabel) -> String {
        self.path(&self.endpoints.collect, Some(label))
    }

    /// `None` asks the service to pick among every trained class.
    #[must_use]
    pub fn predict_path(&self, label: Option<&ClassLabel>) -> String {
        self.path(&self.endpoints.predict, label)
    }

    /// `None` trains the whole family.
    #[must_use]
    pub fn train_path(&self, label: Option<&ClassLabel>) -> String {
        self.path(&self.endpoints.train, label)
    }

    /// Path that deletes the samples of `label`.
    #[must_use]
    pub fn data_path(&self, label: &ClassLabel) -> String {
        self.path(&self.endpoints.data, Some(label))
    }

    /// Path that deletes the model of `label`.
    #[must_use]
    pub fn model_path(&self, label: &ClassLabel) -> String {
        self.path(&self.endpoints.model, Some(label))
    }
}
