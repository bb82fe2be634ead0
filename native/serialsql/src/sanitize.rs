/// Parameter sanitization
///
/// Binary parameters may arrive as typed views over a shared buffer. The
/// engine only understands one binary form, so every `Scalar::View` is
/// replaced by the `Scalar::Blob` holding exactly the bytes it covers. The
/// slice shares memory with the original buffer.
use crate::models::{BatchCommand, BatchParams, Scalar};

/// Structural normalization of parameter containers.
///
/// Implementations must be pure and idempotent.
pub trait Sanitize {
    fn sanitize(self) -> Self;
}

impl Sanitize for Scalar {
    fn sanitize(self) -> Self {
        match self {
            Scalar::View(view) => Scalar::Blob(view.to_bytes()),
            other => other,
        }
    }
}

impl<T: Sanitize> Sanitize for Vec<T> {
    fn sanitize(self) -> Self {
        self.into_iter().map(Sanitize::sanitize).collect()
    }
}

impl<T: Sanitize> Sanitize for Option<T> {
    fn sanitize(self) -> Self {
        self.map(Sanitize::sanitize)
    }
}

impl Sanitize for BatchParams {
    fn sanitize(self) -> Self {
        match self {
            BatchParams::Single(params) => BatchParams::Single(params.sanitize()),
            BatchParams::Many(rows) => BatchParams::Many(rows.sanitize()),
        }
    }
}

impl Sanitize for BatchCommand {
    fn sanitize(mut self) -> Self {
        self.params = self.params.sanitize();
        self
    }
}

/// Sanitize an optional positional parameter list.
///
/// `None` ("no parameters") and `Some(vec![])` ("zero parameters") are kept
/// distinct.
pub fn sanitize_params(params: Option<Vec<Scalar>>) -> Option<Vec<Scalar>> {
    params.sanitize()
}
