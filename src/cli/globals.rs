use secrecy::SecretString;

/// Outbound-client settings shared across the server wiring.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub gateway_url: String,
    pub gateway_api_key: Option<SecretString>,
    pub directory_url: String,
    pub directory_api_key: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub const fn new(gateway_url: String, directory_url: String) -> Self {
        Self {
            gateway_url,
            gateway_api_key: None,
            directory_url,
            directory_api_key: None,
        }
    }

    pub fn set_gateway_api_key(&mut self, key: SecretString) {
        self.gateway_api_key = Some(key);
    }

    pub fn set_directory_api_key(&mut self, key: SecretString) {
        self.directory_api_key = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let mut args = GlobalArgs::new(
            "https://gateway.tld/v1".to_string(),
            "https://directory.tld/v1".to_string(),
        );
        assert_eq!(args.gateway_url, "https://gateway.tld/v1");
        assert_eq!(args.directory_url, "https://directory.tld/v1");
        assert!(args.gateway_api_key.is_none());
        assert!(args.directory_api_key.is_none());

        args.set_gateway_api_key(SecretString::from("gw-key"));
        args.set_directory_api_key(SecretString::from("dir-key"));

        assert_eq!(
            args.gateway_api_key
                .as_ref()
                .map(ExposeSecret::expose_secret),
            Some("gw-key")
        );
        assert_eq!(
            args.directory_api_key
                .as_ref()
                .map(ExposeSecret::expose_secret),
            Some("dir-key")
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut args = GlobalArgs::new(
            "https://gateway.tld/v1".to_string(),
            "https://directory.tld/v1".to_string(),
        );
        args.set_gateway_api_key(SecretString::from("super-secret"));

        let rendered = format!("{args:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
