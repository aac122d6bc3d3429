use uuid::Uuid;

/// Generates switch and port names from a short random token.
///
/// Tokens are lowercase hex, so names are safe as interface names. They only
/// make collisions unlikely; a clash still surfaces as a host "already
/// exists" failure.
#[derive(Debug, Clone)]
pub struct LinkNaming {
    switch_prefix: String,
    port_prefix: String,
    token_length: usize,
    fixed_token: Option<String>,
}

impl LinkNaming {
    pub fn new(switch_prefix: &str, port_prefix: &str, token_length: usize) -> Self {
        Self {
            switch_prefix: switch_prefix.to_string(),
            port_prefix: port_prefix.to_string(),
            token_length,
            fixed_token: None,
        }
    }

    /// Always uses `token`, which makes generated names reproducible.
    pub fn with_fixed_token(mut self, token: &str) -> Self {
        self.fixed_token = Some(token.to_string());
        self
    }

    pub fn switch_name(&self) -> String {
        format!("{}-{}", self.switch_prefix, self.token())
    }

    pub fn port_name(&self) -> String {
        format!("{}-{}", self.port_prefix, self.token())
    }

    fn token(&self) -> String {
        match &self.fixed_token {
            Some(token) => token.clone(),
            None => random_token(self.token_length),
        }
    }
}

impl Default for LinkNaming {
    fn default() -> Self {
        Self::new("br-ts", "tap-ts", 6)
    }
}

pub fn random_token(length: usize) -> String {
    Uuid::new_v4().simple().to_string().chars().take(length).collect()
}
