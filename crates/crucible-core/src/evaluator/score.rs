use super::EvaluatorError;
use serde::Serialize;

/// Interpreted result of a code evaluator's output file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EvaluatorScore {
    Boolean(bool),
    Numeric(f64),
}

impl EvaluatorScore {
    pub fn from_output(output: Option<&str>) -> Result<Self, EvaluatorError> {
        let raw = match output.map(str::trim) {
            None | Some("") => return Err(EvaluatorError::ScoreUndefined),
            Some(raw) => raw,
        };

        if raw.eq_ignore_ascii_case("true") {
            return Ok(EvaluatorScore::Boolean(true));
        }
        if raw.eq_ignore_ascii_case("false") {
            return Ok(EvaluatorScore::Boolean(false));
        }
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(EvaluatorScore::Numeric(n)),
            _ => Err(EvaluatorError::UnparseableScore(raw.to_string())),
        }
    }
}

impl std::fmt::Display for EvaluatorScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluatorScore::Boolean(b) => write!(f, "{b}"),
            EvaluatorScore::Numeric(n) => write!(f, "{n}"),
        }
    }
}
