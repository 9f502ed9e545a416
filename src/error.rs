/// Main error type for the library.
#[derive(Debug)]
pub enum Fuse3dError {
    /// Used when the user passes a logically invalid parameter to a function.
    InvalidParameter(String),
    Io(std::io::Error),
    Parser(String),
    Assertion(String),
}

impl std::fmt::Display for Fuse3dError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Fuse3dError::Io(err) => write!(f, "IO error: {}", err),
            Fuse3dError::Parser(err) => write!(f, "Parser error: {}", err),
            Fuse3dError::InvalidParameter(err) => write!(f, "Parameter error: {}", err),
            Fuse3dError::Assertion(err) => write!(f, "Assertion error: {}", err),
        }
    }
}

impl Fuse3dError {
    /// Create an error with the kind `InvalidParameter`.
    /// # Arguments
    /// * `msg` - The error message.
    pub fn invalid_parameter<T: ToString>(msg: T) -> Self {
        Fuse3dError::InvalidParameter(msg.to_string())
    }

    /// Create an error with the kind `Assertion`.
    pub fn assertion<T: ToString>(msg: T) -> Self {
        Fuse3dError::Assertion(msg.to_string())
    }

    /// Create an error with the kind `Parser`.
    pub fn parser<T: ToString>(msg: T) -> Self {
        Fuse3dError::Parser(msg.to_string())
    }
}

impl From<std::io::Error> for Fuse3dError {
    fn from(err: std::io::Error) -> Self {
        Fuse3dError::Io(err)
    }
}

impl std::error::Error for Fuse3dError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Fuse3dError::Io(err) => Some(err),
            Fuse3dError::Parser(_) => None,
            Fuse3dError::InvalidParameter(_) => None,
            Fuse3dError::Assertion(_) => None,
        }
    }
}
