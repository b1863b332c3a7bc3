//! 纯函数地理计算：大圆距离、距离格式化、按图片宽高比校正的范围。

mod distance;
mod extent;
mod geometry;

pub use distance::{EARTH_RADIUS_M, distance, format_distance, haversine};
pub use extent::{Bounds, MARGIN_RATIO, extent_of, fit_aspect, with_margin};
pub use geometry::{Geometry, Position, geometries_of, lng_lat};
