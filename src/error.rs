//! TR-069 fault taxonomy
//!
//! All façade operations report failures as TR-069 integer fault codes
//! (9000–9013). Transport-level faults (8000–8005) belong to the adapter
//! boundary only, and the data-model configuration loader has its own local
//! range (9040–9043). `Fault` keeps the symbolic form; `code()` produces the
//! wire integer.

use thiserror::Error;

/// Result type for data-model operations
pub type DmResult<T> = Result<T, Fault>;

/// TR-069 fault codes as returned by façade operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// 9000 Method not supported
    #[error("method not supported")]
    MethodNotSupported,

    /// 9001 Request denied
    #[error("request denied")]
    RequestDenied,

    /// 9002 Internal error
    #[error("internal error: {0}")]
    InternalError(String),

    /// 9003 Invalid arguments
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// 9004 Resources exceeded
    #[error("resources exceeded")]
    ResourcesExceeded,

    /// 9005 Invalid parameter name
    #[error("invalid parameter name: {0}")]
    InvalidParameterName(String),

    /// 9006 Invalid parameter type
    #[error("invalid parameter type for {0}")]
    InvalidParameterType(String),

    /// 9007 Invalid parameter value
    #[error("invalid value for {name}: {value}")]
    InvalidParameterValue {
        /// Parameter the value was destined for
        name: String,
        /// The rejected value
        value: String,
    },

    /// 9008 Attempt to set a non-writable parameter
    #[error("parameter {0} is read-only")]
    ReadOnlyParameter(String),

    /// 9009 Notification request rejected
    #[error("notification request rejected for {0}")]
    NotificationRejected(String),

    /// 9010 Download failure
    #[error("download failure")]
    DownloadFailure,

    /// 9011 Upload failure
    #[error("upload failure")]
    UploadFailure,

    /// 9012 File transfer server authentication failure
    #[error("file transfer authentication failure")]
    TransferAuthFailure,

    /// 9013 Unsupported protocol for file transfer
    #[error("unsupported file transfer protocol")]
    UnsupportedTransferProtocol,

    /// 9040 Data-model configuration: malformed document
    #[error("data-model configuration syntax error: {0}")]
    ConfigSyntax(String),

    /// 9041 Data-model configuration: unknown command
    #[error("data-model configuration: unknown command {0}")]
    ConfigUnknownCommand(String),

    /// 9042 Data-model configuration: missing mandatory attribute
    #[error("data-model configuration: missing {0}")]
    ConfigMissingAttribute(String),

    /// 9043 Data-model configuration: definition rejected
    #[error("data-model configuration: definition rejected for {0}")]
    ConfigDefinitionRejected(String),

    /// 9800 Transport-layer fault reported by the device adapter
    #[error("adapter transport fault")]
    AdapterTransport,

    /// Raw adapter code outside the named set, passed through unchanged
    #[error("adapter fault {0}")]
    Adapter(u16),
}

impl Fault {
    /// The TR-069 integer code for this fault
    pub fn code(&self) -> u16 {
        match self {
            Fault::MethodNotSupported => 9000,
            Fault::RequestDenied => 9001,
            Fault::InternalError(_) => 9002,
            Fault::InvalidArguments(_) => 9003,
            Fault::ResourcesExceeded => 9004,
            Fault::InvalidParameterName(_) => 9005,
            Fault::InvalidParameterType(_) => 9006,
            Fault::InvalidParameterValue { .. } => 9007,
            Fault::ReadOnlyParameter(_) => 9008,
            Fault::NotificationRejected(_) => 9009,
            Fault::DownloadFailure => 9010,
            Fault::UploadFailure => 9011,
            Fault::TransferAuthFailure => 9012,
            Fault::UnsupportedTransferProtocol => 9013,
            Fault::ConfigSyntax(_) => 9040,
            Fault::ConfigUnknownCommand(_) => 9041,
            Fault::ConfigMissingAttribute(_) => 9042,
            Fault::ConfigDefinitionRejected(_) => 9043,
            Fault::AdapterTransport => 9800,
            Fault::Adapter(code) => *code,
        }
    }

    /// Build a fault from a non-zero adapter return code
    pub fn from_adapter_code(code: u16) -> Fault {
        match code {
            9000 => Fault::MethodNotSupported,
            9001 => Fault::RequestDenied,
            9002 => Fault::internal("adapter internal error"),
            9003 => Fault::InvalidArguments(String::new()),
            9004 => Fault::ResourcesExceeded,
            9010 => Fault::DownloadFailure,
            9011 => Fault::UploadFailure,
            9012 => Fault::TransferAuthFailure,
            9013 => Fault::UnsupportedTransferProtocol,
            9800..=9805 => Fault::AdapterTransport,
            other => Fault::Adapter(other),
        }
    }

    /// Shorthand for an internal error with a message
    pub fn internal(message: impl Into<String>) -> Fault {
        Fault::InternalError(message.into())
    }
}

/// Per-parameter fault entry returned for partial SetParameterValues failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterFault {
    /// Fully qualified parameter name
    pub name: String,
    /// The specific fault for this parameter
    pub fault: Fault,
}

impl ParameterFault {
    /// Pair a parameter name with its fault
    pub fn new(name: impl Into<String>, fault: Fault) -> Self {
        Self {
            name: name.into(),
            fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_tr069_table() {
        assert_eq!(Fault::MethodNotSupported.code(), 9000);
        assert_eq!(Fault::internal("x").code(), 9002);
        assert_eq!(Fault::ReadOnlyParameter("a".into()).code(), 9008);
        assert_eq!(Fault::ConfigSyntax("bad".into()).code(), 9040);
        assert_eq!(Fault::AdapterTransport.code(), 9800);
    }

    #[test]
    fn adapter_codes_round_trip() {
        assert_eq!(Fault::from_adapter_code(9004), Fault::ResourcesExceeded);
        assert_eq!(Fault::from_adapter_code(9801), Fault::AdapterTransport);
        assert_eq!(Fault::from_adapter_code(9123).code(), 9123);
    }
}
