//! Extension pour intégrer la configuration Spotify dans rrconfig
//!
//! Ce module fournit le trait `SpotifyConfigExt` qui ajoute à
//! `rrconfig::Config` les méthodes de gestion des credentials et du device
//! Spotify Connect.

use anyhow::{Result, anyhow};
use rrconfig::Config;
use serde_yaml::Value;

use crate::client::SpotifyCredentials;

/// Trait d'extension pour gérer la configuration Spotify dans rrconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use rrconfig::Config;
/// use rrspotify::SpotifyConfigExt;
///
/// let config = Config::load_config("")?;
/// let credentials = config.get_spotify_credentials()?;
/// ```
pub trait SpotifyConfigExt {
    /// Récupère le client_id de l'application Spotify
    fn get_spotify_client_id(&self) -> Result<String>;

    /// Récupère le client_secret de l'application Spotify
    fn get_spotify_client_secret(&self) -> Result<String>;

    /// Récupère le refresh token obtenu lors de l'autorisation OAuth
    fn get_spotify_refresh_token(&self) -> Result<String>;

    /// Enregistre un nouveau refresh token (rotation côté Spotify)
    fn set_spotify_refresh_token(&self, token: &str) -> Result<()>;

    /// Récupère les trois credentials nécessaires au client
    ///
    /// # Errors
    ///
    /// Retourne une erreur si l'un des credentials n'est pas configuré
    fn get_spotify_credentials(&self) -> Result<SpotifyCredentials>;

    /// Id du device Spotify Connect à utiliser, s'il est fixé
    fn get_spotify_device_id(&self) -> Option<String>;

    fn set_spotify_device_id(&self, device_id: &str) -> Result<()>;

    /// Nom du device Spotify Connect recherché (par défaut "raspotify")
    fn get_spotify_device_name(&self) -> Option<String>;

    /// Démarrer le service raspotify s'il ne tourne pas
    fn get_spotify_manage_raspotify(&self) -> bool;
}

impl SpotifyConfigExt for Config {
    fn get_spotify_client_id(&self) -> Result<String> {
        required(self, "client_id")
    }

    fn get_spotify_client_secret(&self) -> Result<String> {
        required(self, "client_secret")
    }

    fn get_spotify_refresh_token(&self) -> Result<String> {
        required(self, "refresh_token")
    }

    fn set_spotify_refresh_token(&self, token: &str) -> Result<()> {
        self.set_value(&["spotify", "refresh_token"], Value::String(token.to_string()))
    }

    fn get_spotify_credentials(&self) -> Result<SpotifyCredentials> {
        Ok(SpotifyCredentials {
            client_id: self.get_spotify_client_id()?,
            client_secret: self.get_spotify_client_secret()?,
            refresh_token: self.get_spotify_refresh_token()?,
        })
    }

    fn get_spotify_device_id(&self) -> Option<String> {
        self.get_optional_string(&["spotify", "device_id"])
    }

    fn set_spotify_device_id(&self, device_id: &str) -> Result<()> {
        self.set_value(&["spotify", "device_id"], Value::String(device_id.to_string()))
    }

    fn get_spotify_device_name(&self) -> Option<String> {
        self.get_optional_string(&["spotify", "device_name"])
    }

    fn get_spotify_manage_raspotify(&self) -> bool {
        match self.get_value(&["spotify", "manage_raspotify"]) {
            Ok(Value::Bool(b)) => b,
            _ => true,
        }
    }
}

fn required(config: &Config, key: &str) -> Result<String> {
    config
        .get_optional_string(&["spotify", key])
        .ok_or_else(|| anyhow!("spotify.{} is not configured", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_credentials_roundtrip() {
        let dir = tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        assert!(config.get_spotify_credentials().is_err());
        assert_eq!(config.get_spotify_device_name().as_deref(), Some("raspotify"));
        assert!(config.get_spotify_manage_raspotify());

        config
            .set_value(&["spotify", "client_id"], Value::String("id".into()))
            .unwrap();
        config
            .set_value(&["spotify", "client_secret"], Value::String("secret".into()))
            .unwrap();
        config.set_spotify_refresh_token("refresh").unwrap();

        let credentials = config.get_spotify_credentials().unwrap();
        assert_eq!(credentials.client_id, "id");
        assert_eq!(credentials.refresh_token, "refresh");
    }
}
