use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Encoding,
    Decode,
    Io,
    Protocol,
    Timeout,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    op: Option<&'static str>,
    target: Option<String>,
    status: Option<u16>,
    body: Option<String>,
    tx_id: Option<i64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            op: None,
            target: None,
            status: None,
            body: None,
            tx_id: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn op(&self) -> Option<&'static str> {
        self.op
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn tx_id(&self) -> Option<i64> {
        self.tx_id
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_op(mut self, op: &'static str) -> Self {
        self.op = Some(op);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_tx_id(mut self, tx_id: i64) -> Self {
        self.tx_id = Some(tx_id);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(op) = self.op {
            write!(f, " (op: {op})")?;
        }
        if let Some(target) = &self.target {
            write!(f, " (target: {target})")?;
        }
        if let Some(tx_id) = self.tx_id {
            write!(f, " (tx: {tx_id})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        if let Some(body) = &self.body {
            write!(f, " (body: {body})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Encoding => 3,
        ErrorKind::Decode => 4,
        ErrorKind::Io => 5,
        ErrorKind::Protocol => 6,
        ErrorKind::Timeout => 7,
    }
}
