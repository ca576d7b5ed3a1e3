//! The lock screen: an ordinary calculator whose `=` doubles as the unlock key.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '−',
            Operator::Mul => '×',
            Operator::Div => '÷',
        }
    }

    fn from_symbol(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Add),
            '−' => Some(Operator::Sub),
            '×' => Some(Operator::Mul),
            '÷' => Some(Operator::Div),
            _ => None,
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> Option<f64> {
        match self {
            Operator::Add => Some(lhs + rhs),
            Operator::Sub => Some(lhs - rhs),
            Operator::Mul => Some(lhs * rhs),
            Operator::Div if rhs == 0.0 => None,
            Operator::Div => Some(lhs / rhs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(u8),
    Dot,
    Op(Operator),
    Clear,
    Backspace,
    Equals,
}

impl Key {
    pub fn label(self) -> String {
        match self {
            Key::Digit(d) => d.to_string(),
            Key::Dot => ".".to_string(),
            Key::Op(op) => op.symbol().to_string(),
            Key::Clear => "C".to_string(),
            Key::Backspace => "⌫".to_string(),
            Key::Equals => "=".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Updated,
    /// The caller should ask the backend whether this is the user's passcode.
    VerifyPasscode(String),
    Ignored,
}

const ERROR_TEXT: &str = "Error";

#[derive(Debug, Default, Clone)]
pub struct Calculator {
    input: String,
}

impl Calculator {
    pub fn new() -> Self {
        Calculator::default()
    }

    pub fn display(&self) -> &str {
        if self.input.is_empty() {
            "0"
        } else {
            &self.input
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn press(&mut self, key: Key, signed_in: bool) -> KeyOutcome {
        if self.input == ERROR_TEXT && key != Key::Equals {
            self.input.clear();
        }
        match key {
            Key::Clear => {
                self.input.clear();
                KeyOutcome::Updated
            }
            Key::Backspace => {
                self.input.pop();
                KeyOutcome::Updated
            }
            Key::Digit(d) if d <= 9 => {
                self.input.push(char::from(b'0' + d));
                KeyOutcome::Updated
            }
            Key::Digit(_) => KeyOutcome::Ignored,
            Key::Dot => {
                let current = self
                    .input
                    .rsplit(|c| Operator::from_symbol(c).is_some())
                    .next()
                    .unwrap_or("");
                if current.contains('.') {
                    return KeyOutcome::Ignored;
                }
                if current.is_empty() {
                    self.input.push('0');
                }
                self.input.push('.');
                KeyOutcome::Updated
            }
            Key::Op(op) => {
                match self.input.chars().last() {
                    None => return KeyOutcome::Ignored,
                    Some(last) if Operator::from_symbol(last).is_some() => {
                        self.input.pop();
                    }
                    Some(_) => {}
                }
                self.input.push(op.symbol());
                KeyOutcome::Updated
            }
            Key::Equals => self.equals(signed_in),
        }
    }

    fn equals(&mut self, signed_in: bool) -> KeyOutcome {
        if self.input.is_empty() {
            return KeyOutcome::Ignored;
        }
        let is_code = self.input.chars().all(|c| c.is_ascii_digit());
        if signed_in && is_code {
            return KeyOutcome::VerifyPasscode(self.input.clone());
        }
        if is_code {
            return KeyOutcome::Updated;
        }
        self.input = match evaluate(&self.input) {
            Some(value) => format_number(value),
            None => ERROR_TEXT.to_string(),
        };
        KeyOutcome::Updated
    }

    /// Called once the backend accepted the passcode.
    pub fn unlocked(&mut self) {
        self.input.clear();
    }
}

/// Left-to-right evaluation; `None` on malformed input or division by zero.
pub fn evaluate(expr: &str) -> Option<f64> {
    let mut total: Option<f64> = None;
    let mut pending: Option<Operator> = None;
    let mut number = String::new();

    for c in expr.chars() {
        if let Some(op) = Operator::from_symbol(c) {
            fold_number(&mut number, &mut total, pending)?;
            pending = Some(op);
        } else if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else {
            return None;
        }
    }
    if number.is_empty() {
        // Trailing operator: ignore it.
        return total;
    }
    fold_number(&mut number, &mut total, pending)?;
    total
}

fn fold_number(number: &mut String, total: &mut Option<f64>, pending: Option<Operator>) -> Option<()> {
    let value: f64 = number.parse().ok().filter(|v: &f64| v.is_finite())?;
    number.clear();
    let folded = match (*total, pending) {
        (None, _) => value,
        (Some(lhs), Some(op)) => op.apply(lhs, value)?,
        (Some(_), None) => return None,
    };
    // Overflow reads as an error, never as "inf".
    *total = Some(folded).filter(|v| v.is_finite());
    total.map(|_| ())
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{:.10}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
