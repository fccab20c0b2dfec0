pub mod lags;
pub mod train_all;
pub mod train_model;
