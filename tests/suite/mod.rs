mod common;
mod compat;
mod locate;
mod lookup;
