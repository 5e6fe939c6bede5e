//! Gestion des erreurs pour le client Spotify

use thiserror::Error;

/// Type Result personnalisé pour rrspotify
pub type Result<T> = std::result::Result<T, SpotifyError>;

/// Erreurs possibles lors de l'utilisation du client Spotify
#[derive(Error, Debug)]
pub enum SpotifyError {
    /// Token expiré ou credentials invalides (HTTP 401, ou refus du
    /// serveur d'authentification)
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Opération refusée (HTTP 403), typiquement un compte non Premium
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Ressource ou device introuvable (HTTP 404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Quota dépassé (rate limiting)
    #[error("Rate limit exceeded, please try again later")]
    RateLimited,

    /// Erreur de l'API Spotify
    #[error("Spotify API error (code {code}): {message}")]
    Api { code: u16, message: String },

    /// Erreur HTTP (transport)
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Erreur de configuration (anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Credential absent de la configuration
    #[error("Missing Spotify credential: {0}")]
    MissingCredential(&'static str),

    /// Aucun device Spotify Connect utilisable
    #[error("No playback device available: {0}")]
    NoDevice(String),
}

impl SpotifyError {
    /// Crée une erreur API depuis un code de statut HTTP et un message
    pub fn from_status_code(code: u16, message: impl Into<String>) -> Self {
        match code {
            401 => Self::Unauthorized(message.into()),
            403 => Self::Forbidden(message.into()),
            404 => Self::NotFound(message.into()),
            429 => Self::RateLimited,
            _ => Self::Api {
                code,
                message: message.into(),
            },
        }
    }

    /// Vérifie si l'erreur est une erreur de credentials
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            SpotifyError::Unauthorized(_) | SpotifyError::MissingCredential(_)
        )
    }

    /// Vérifie si l'erreur est transitoire (réseau, 5xx, rate limiting)
    pub fn is_network(&self) -> bool {
        match self {
            SpotifyError::Http(_) | SpotifyError::RateLimited => true,
            SpotifyError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SpotifyError::NotFound(_) | SpotifyError::NoDevice(_))
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, SpotifyError::Forbidden(_))
    }
}
