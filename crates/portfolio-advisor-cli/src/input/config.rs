use portfolio_advisor_core::OptimizerConfig;

use super::file;

/// Load an optimizer configuration from YAML, or JSON when the file ends in
/// `.json`. No path means defaults.
pub fn load_config(path: Option<&str>) -> Result<OptimizerConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(OptimizerConfig::default());
    };
    let (canonical, contents) = file::read_to_string(path)?;
    let is_json = canonical
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    parse_config(&contents, is_json)
        .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e).into())
}

pub fn parse_config(contents: &str, is_json: bool) -> Result<OptimizerConfig, Box<dyn std::error::Error>> {
    if contents.trim().is_empty() {
        return Ok(OptimizerConfig::default());
    }
    let config = if is_json {
        serde_json::from_str(contents)?
    } else {
        serde_yaml::from_str(contents)?
    };
    Ok(config)
}

/// Command-line flags that take precedence over the configuration file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub risk_free_rate: Option<f64>,
    pub max_weight: Option<f64>,
    pub precision: Option<u32>,
}

impl Overrides {
    pub fn apply(&self, mut config: OptimizerConfig) -> OptimizerConfig {
        if let Some(rf) = self.risk_free_rate {
            config.risk_free_rate = rf;
        }
        if let Some(cap) = self.max_weight {
            config.max_weight = Some(cap);
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_advisor_core::estimation::returns::ReturnMethod;
    use portfolio_advisor_core::estimation::ReturnFrequency;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_yaml_partial_document() {
        let yaml = "risk_free_rate: 0.02\nfrequency: weekly\nreturn_method: compounded\nsolver:\n  max_iterations: 500\n";
        let cfg = parse_config(yaml, false).unwrap();
        assert_eq!(cfg.risk_free_rate, 0.02);
        assert_eq!(cfg.frequency, Some(ReturnFrequency::Weekly));
        assert_eq!(cfg.return_method, ReturnMethod::Compounded);
        assert_eq!(cfg.solver.max_iterations, 500);
        assert_eq!(cfg.precision, 4);
    }

    #[test]
    fn test_json_document() {
        let json = r#"{"max_weight": 0.3, "return_method": {"exponential": {"span": 30}}}"#;
        let cfg = parse_config(json, true).unwrap();
        assert_eq!(cfg.max_weight, Some(0.3));
        assert_eq!(cfg.return_method, ReturnMethod::Exponential { span: 30 });
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(parse_config("  \n", false).unwrap(), OptimizerConfig::default());
        assert_eq!(parse_config("{}", true).unwrap(), OptimizerConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let cfg = parse_config("risk_free_rate: 0.02\nprecision: 2\n", false).unwrap();
        let cfg = Overrides {
            risk_free_rate: Some(0.05),
            max_weight: Some(0.5),
            precision: None,
        }
        .apply(cfg);
        assert_eq!(cfg.risk_free_rate, 0.05);
        assert_eq!(cfg.max_weight, Some(0.5));
        assert_eq!(cfg.precision, 2);
    }
}
