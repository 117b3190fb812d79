mod common;
mod naive;
mod produce;
