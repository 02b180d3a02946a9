pub mod allocator;
pub mod cooldown;
pub mod sl_tp;
pub mod trade_management;
