use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("PARLOR_RELAY_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PARLOR_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_joins_bind_and_port() {
        let config = Config {
            bind_addr: "127.0.0.1".to_string(),
            port: 9000,
        };
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
    }
}
