use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Sessions,
    Users,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dataset::Sessions => "sesiones",
            Dataset::Users => "usuarios",
        })
    }
}

/// A failed fetch. The display text is shown to dashboard users as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Error obteniendo {dataset} (HTTP {status})")]
    Status { dataset: Dataset, status: u16 },
    #[error("Error obteniendo {dataset}: {message}")]
    Network { dataset: Dataset, message: String },
    #[error("Error obteniendo {dataset}: respuesta no válida ({message})")]
    Decode { dataset: Dataset, message: String },
}

impl FetchError {
    pub fn dataset(&self) -> Dataset {
        match self {
            FetchError::Status { dataset, .. }
            | FetchError::Network { dataset, .. }
            | FetchError::Decode { dataset, .. } => *dataset,
        }
    }
}

/// A session selection that could not be honoured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no dashboard data has been loaded yet")]
    NotLoaded,
    #[error("unknown session {0}")]
    UnknownSession(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_dataset() {
        let e = FetchError::Status { dataset: Dataset::Sessions, status: 503 };
        assert_eq!(e.to_string(), "Error obteniendo sesiones (HTTP 503)");
        let e = FetchError::Network { dataset: Dataset::Users, message: "connection refused".into() };
        assert_eq!(e.to_string(), "Error obteniendo usuarios: connection refused");
        assert_eq!(e.dataset(), Dataset::Users);
    }
}
