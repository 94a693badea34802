pub mod block_page;
pub mod decision;
pub mod rate;
