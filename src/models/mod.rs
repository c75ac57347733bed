pub mod game;
pub mod order;
pub mod position;
pub mod price;

pub use game::{Game, GamePlayer, GameState, GameStatus};
pub use order::{NewExecution, NewOrder, Order, OrderExecution, OrderSide, OrderStatus, OrderType};
pub use position::{weighted_entry, NewPosition, Position, PositionPatch, PositionStatus};
pub use price::{EquityPoint, LeaderboardEntry, PricePoint};
