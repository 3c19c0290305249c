use std::collections::HashMap;

use runbatch_common::error::ConfigError;
use runbatch_common::{IMAGE_ATTRIBUTE, JSON_ENV_ATTRIBUTE, SECRET_JSON_ENVS_ATTRIBUTE};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub image: String,
    pub json_env: Option<String>,
    pub secret_json_envs: Vec<String>,
}

/**
 * This function extracts the workload configuration from the flat instance
 * attribute map set by the launcher.
 */
pub fn get_config_from_attributes(
    attributes: &HashMap<String, String>,
) -> Result<BatchConfig, ConfigError> {
    let image = attributes
        .get(IMAGE_ATTRIBUTE)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingAttribute(IMAGE_ATTRIBUTE.to_string()))?
        .clone();

    // The launcher sets every key, so empty values mean "not configured".
    let json_env = attributes
        .get(JSON_ENV_ATTRIBUTE)
        .filter(|v| !v.is_empty())
        .cloned();

    let secret_json_envs = attributes
        .get(SECRET_JSON_ENVS_ATTRIBUTE)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(BatchConfig {
        image,
        json_env,
        secret_json_envs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_image_is_an_error() {
        let err = get_config_from_attributes(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("runbatch-image"));
    }

    #[test]
    fn empty_values_are_treated_as_unset() {
        let attrs = attributes(&[
            ("runbatch-image", "busybox"),
            ("runbatch-json-env", ""),
            ("runbatch-secret-json-envs", ""),
        ]);
        let config = get_config_from_attributes(&attrs).unwrap();
        assert_eq!(config.image, "busybox");
        assert_eq!(config.json_env, None);
        assert!(config.secret_json_envs.is_empty());
    }

    #[test]
    fn secret_list_keeps_order_and_skips_blanks() {
        let attrs = attributes(&[
            ("runbatch-image", "busybox"),
            (
                "runbatch-secret-json-envs",
                "projects/1/secrets/s1/versions/latest, projects/1/secrets/s2/versions/latest,",
            ),
        ]);
        let config = get_config_from_attributes(&attrs).unwrap();
        assert_eq!(
            config.secret_json_envs,
            vec![
                "projects/1/secrets/s1/versions/latest",
                "projects/1/secrets/s2/versions/latest"
            ]
        );
    }
}
