//! Built-in core tools: the versioned calculator pair and a clock.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, ToolError};
use crate::tool::{Tool, ToolOutput, VersionInfo};
use crate::version::ToolVersion;

/// Calculator v1: takes a raw expression string.
pub struct CalculatorV1 {
    info: VersionInfo,
}

impl CalculatorV1 {
    pub fn new() -> Self {
        Self {
            info: VersionInfo::new(ToolVersion::new(1, 0, 0), ToolVersion::new(1, 0, 0)),
        }
    }
}

impl Default for CalculatorV1 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorV1 {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a basic arithmetic expression"
    }

    fn usage(&self) -> &str {
        "calculator(\"1 + 2 * 3\")"
    }

    fn version_info(&self) -> Option<&VersionInfo> {
        Some(&self.info)
    }

    fn trigger_keywords(&self) -> Vec<String> {
        ["calculate", "compute", "what is", "+", "*", "/"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn invoke(&self, args: Value) -> Result<ToolOutput> {
        let expr = match &args {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let result = eval_expression(&expr)?;
        Ok(ToolOutput::Text(format!("result: {}", format_number(result))))
    }
}

/// Calculator v2: takes `{expression, precision}` and migrates 1.x string
/// arguments into that shape.
pub struct CalculatorV2 {
    info: VersionInfo,
}

impl CalculatorV2 {
    pub fn new() -> Self {
        Self {
            // Backward compatible with v1 requests.
            info: VersionInfo::new(ToolVersion::new(2, 0, 0), ToolVersion::new(1, 0, 0)),
        }
    }
}

impl Default for CalculatorV2 {
    fn default() -> Self {
        Self::new()
    }
}

/// Default rounding precision when migrating v1 arguments.
const DEFAULT_PRECISION: u32 = 2;

#[async_trait]
impl Tool for CalculatorV2 {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression with configurable precision"
    }

    fn usage(&self) -> &str {
        "calculator({\"expression\": \"1 / 3\", \"precision\": 4})"
    }

    fn version_info(&self) -> Option<&VersionInfo> {
        Some(&self.info)
    }

    fn trigger_keywords(&self) -> Vec<String> {
        ["calculate", "compute", "what is", "+", "*", "/"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn migrate_args(&self, from_version: &ToolVersion, args: &Value) -> Option<Value> {
        // 1.x callers pass a bare expression string.
        if from_version.major == 1 {
            if let Value::String(s) = args {
                return Some(serde_json::json!({
                    "expression": s,
                    "precision": DEFAULT_PRECISION,
                }));
            }
        }
        None
    }

    async fn invoke(&self, args: Value) -> Result<ToolOutput> {
        let (expression, precision) = match &args {
            Value::Object(map) => {
                let expression = map
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ToolError::InvalidArgument("missing 'expression' field".into())
                    })?
                    .to_string();
                let precision = map
                    .get("precision")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_PRECISION as u64) as u32;
                (expression, precision)
            }
            Value::String(s) => (s.clone(), DEFAULT_PRECISION),
            other => {
                return Err(ToolError::InvalidArgument(format!(
                    "unsupported calculator arguments: {other}"
                )))
            }
        };
        let value = eval_expression(&expression)?;
        let factor = 10f64.powi(precision as i32);
        let rounded = (value * factor).round() / factor;
        Ok(ToolOutput::Structured(serde_json::json!({
            "expression": expression,
            "result": format_number(rounded),
            "precision": precision,
        })))
    }
}

/// Reports the current UTC time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Report the current date and time in UTC"
    }

    fn usage(&self) -> &str {
        "current_time()"
    }

    fn trigger_keywords(&self) -> Vec<String> {
        ["what time", "what date", "today's date"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn invoke(&self, _args: Value) -> Result<ToolOutput> {
        let now = chrono::Utc::now();
        Ok(ToolOutput::Text(format!(
            "current time: {}",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        )))
    }
}

/// Render without a trailing ".0" for whole numbers.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// --- expression evaluation --------------------------------------------------
//
// Small precedence-climbing parser over + - * / % ^ with parentheses and
// unary minus. There is no safe `eval` to borrow here.

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

pub fn eval_expression(expr: &str) -> Result<f64> {
    let mut parser = Parser {
        chars: expr.chars().peekable(),
    };
    let value = parser.parse_expr(0)?;
    parser.skip_ws();
    if parser.chars.peek().is_some() {
        return Err(ToolError::InvalidArgument(format!(
            "unexpected trailing input in expression: {expr}"
        )));
    }
    if !value.is_finite() {
        return Err(ToolError::Execution(format!(
            "expression did not evaluate to a finite number: {expr}"
        )));
    }
    Ok(value)
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<f64> {
        let mut lhs = self.parse_atom()?;
        loop {
            self.skip_ws();
            let op = match self.chars.peek() {
                Some(&c @ ('+' | '-' | '*' | '/' | '%' | '^')) => c,
                _ => break,
            };
            let (prec, right_assoc) = match op {
                '+' | '-' => (1, false),
                '*' | '/' | '%' => (2, false),
                '^' => (3, true),
                _ => unreachable!(),
            };
            if prec < min_prec {
                break;
            }
            self.chars.next();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_expr(next_min)?;
            lhs = match op {
                '+' => lhs + rhs,
                '-' => lhs - rhs,
                '*' => lhs * rhs,
                '/' => {
                    if rhs == 0.0 {
                        return Err(ToolError::Execution("division by zero".into()));
                    }
                    lhs / rhs
                }
                '%' => {
                    if rhs == 0.0 {
                        return Err(ToolError::Execution("modulo by zero".into()));
                    }
                    lhs % rhs
                }
                '^' => lhs.powf(rhs),
                _ => unreachable!(),
            };
        }
        Ok(lhs)
    }

    fn parse_atom(&mut self) -> Result<f64> {
        self.skip_ws();
        match self.chars.peek() {
            Some('(') => {
                self.chars.next();
                let value = self.parse_expr(0)?;
                self.skip_ws();
                if self.chars.next() != Some(')') {
                    return Err(ToolError::InvalidArgument(
                        "unbalanced parentheses".into(),
                    ));
                }
                Ok(value)
            }
            Some('-') => {
                self.chars.next();
                Ok(-self.parse_atom()?)
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => {
                let mut number = String::new();
                while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
                    number.push(self.chars.next().unwrap());
                }
                number.parse::<f64>().map_err(|_| {
                    ToolError::InvalidArgument(format!("malformed number: {number}"))
                })
            }
            other => Err(ToolError::InvalidArgument(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}
