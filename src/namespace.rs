//! Namespace derivation: `"{provider}:{model}:{dim}"`.
//!
//! A namespace is the only isolation boundary between stored notes. Two
//! different strings address disjoint storage; changing provider, model, or
//! dimension starts a fresh namespace and never migrates data.

use std::fmt;
use std::str::FromStr;

/// Parsed `provider:model:dim` triple. `dim == 0` means "not yet discovered".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub provider: String,
    pub model: String,
    pub dim: usize,
}

impl Namespace {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dim,
        }
    }

    /// Same provider and model with a resolved dimension.
    pub fn with_dim(&self, dim: usize) -> Self {
        Self {
            dim,
            ..self.clone()
        }
    }

    pub fn is_dim_known(&self) -> bool {
        self.dim > 0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.model, self.dim)
    }
}

impl FromStr for Namespace {
    type Err = String;

    /// Provider is everything before the first `:`, dim everything after the last,
    /// so model names that themselves contain `:` (e.g. `nomic-embed-text:latest`) survive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid namespace {s:?}: expected provider:model:dim"))?;
        let (model, dim) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid namespace {s:?}: expected provider:model:dim"))?;
        if provider.is_empty() || model.is_empty() {
            return Err(format!("invalid namespace {s:?}: empty provider or model"));
        }
        let dim = dim
            .parse::<usize>()
            .map_err(|e| format!("invalid dim in namespace {s:?}: {e}"))?;
        Ok(Self::new(provider, model, dim))
    }
}

/// Collection-safe form of a namespace string: `:` and `/` become `_`.
pub fn sanitize_collection_name(namespace: &str) -> String {
    namespace.replace([':', '/'], "_")
}
