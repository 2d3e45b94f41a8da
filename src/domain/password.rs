use secrecy::{ExposeSecret, SecretString};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A candidate password that satisfies the length policy.
pub struct Password(SecretString);

impl Password {
    pub fn into_secret(self) -> SecretString {
        self.0
    }

    pub fn to_secret(&self) -> SecretString {
        SecretString::from(self.0.expose_secret().to_string())
    }
}

impl TryFrom<String> for Password {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(format!(
                "Password length must be {MIN_PASSWORD_LENGTH} or greater"
            ));
        }
        Ok(Self(SecretString::from(value)))
    }
}

impl ExposeSecret<str> for Password {
    fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl<'de> serde::Deserialize<'de> for Password {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.try_into().map_err(serde::de::Error::custom)
    }
}
