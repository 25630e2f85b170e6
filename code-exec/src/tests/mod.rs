mod isolation;
mod utils;
