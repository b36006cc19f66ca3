//! Access token generation for randomized serving paths

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Number of characters in a generated access token.
///
/// Eight alphanumeric characters (~47 bits) make guessing the path
/// impractical for the short window a file is typically shared. This is a
/// usability tradeoff, not a cryptographic control: anyone who learns the
/// URL can fetch the file.
pub const ACCESS_TOKEN_LENGTH: usize = 8;

/// Generate a random alphanumeric access token
///
/// The token is the only valid path segment for the info and download
/// routes. It is generated once at startup and lives for the process
/// lifetime.
pub fn generate_access_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
