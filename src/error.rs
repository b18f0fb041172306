use std::fmt;

/// Host-level errors. Scheme-level failures (unbound names, bad arguments,
/// divide by zero, ...) are ordinary `Value::Error` values and never travel
/// through this type.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemeError {
    /// A registry reached its configured capacity.
    HeapExhausted { kind: &'static str, capacity: usize },

    /// A frame was popped out of LIFO order, or from an empty stack.
    StackDiscipline(String),

    /// Reader error.
    Read(String),

    /// I/O error from file loading.
    Io(String),
}

impl SchemeError {
    /// Fatal errors end the process; the rest are reported and the driver
    /// moves on to the next input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchemeError::HeapExhausted { .. } | SchemeError::StackDiscipline(_)
        )
    }
}

impl fmt::Display for SchemeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeError::HeapExhausted { kind, capacity } => {
                write!(f, "Fatal: {} registry exhausted ({} objects)", kind, capacity)
            }
            SchemeError::StackDiscipline(msg) => write!(f, "Fatal: frame stack violation: {}", msg),
            SchemeError::Read(msg) => write!(f, "Read error: {}", msg),
            SchemeError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SchemeError {}

impl From<std::io::Error> for SchemeError {
    fn from(e: std::io::Error) -> Self {
        SchemeError::Io(e.to_string())
    }
}

pub type SchemeResult<T> = Result<T, SchemeError>;
