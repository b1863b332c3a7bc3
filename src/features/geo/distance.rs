use super::geometry::{Position, lng_lat};

/// 地球平均半径（米）
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 两点间的大圆距离（haversine），输入为 `(经度, 纬度)`，单位米。
pub fn haversine(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lng1, lat1) = from;
    let (lng2, lat2) = to;

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// 依次累加相邻点的 haversine 距离；0 或 1 个点时为 0。
pub fn distance(coords: &[Position]) -> f64 {
    coords
        .windows(2)
        .filter_map(|w| Some((lng_lat(&w[0])?, lng_lat(&w[1])?)))
        .map(|(a, b)| haversine(a, b))
        .sum()
}

/// 人类可读的距离：大于 1000 米时为 `X.Y km`，否则为四舍五入的 `N m`。
pub fn format_distance(meters: f64) -> String {
    if meters > 1000.0 {
        format!("{} km", one_decimal(meters / 1000.0))
    } else {
        format!("{} m", meters.round() as i64)
    }
}

/// 保留一位小数：按浮点数的精确十进制值取最近，恰好居中时取较大者（与 JS `toFixed(1)` 一致）。
fn one_decimal(x: f64) -> String {
    // 只有 x = 奇数/4 才会精确落在两个一位小数正中；`{:.1}` 此时取偶，这里改为向上
    let quarters = x * 4.0;
    if quarters.fract() == 0.0 && quarters.rem_euclid(2.0) == 1.0 {
        return format!("{:.1}", (x * 10.0).ceil() / 10.0);
    }
    format!("{x:.1}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_distance_thresholds() {
        assert_eq!(format_distance(999.0), "999 m");
        assert_eq!(format_distance(1000.0), "1000 m");
        assert_eq!(format_distance(1500.0), "1.5 km");
        assert_eq!(format_distance(0.4), "0 m");
        assert_eq!(format_distance(999.5), "1000 m");
        assert_eq!(format_distance(1250.0), "1.3 km");
        assert_eq!(format_distance(12_345.0), "12.3 km");
    }

    #[test]
    fn kilometres_round_on_the_exact_decimal_value() {
        // 1.15 与 1.45 的双精度值略小于中点
        assert_eq!(format_distance(1150.0), "1.1 km");
        assert_eq!(format_distance(1450.0), "1.4 km");
        // 1.05 的双精度值略大于中点
        assert_eq!(format_distance(1050.0), "1.1 km");
        // 可精确表示的中点向上取
        assert_eq!(format_distance(1750.0), "1.8 km");
        assert_eq!(format_distance(2250.0), "2.3 km");
    }

    #[test]
    fn degenerate_sequences_are_zero() {
        assert_eq!(distance(&[]), 0.0);
        assert_eq!(distance(&[vec![2.35, 48.85]]), 0.0);
    }

    #[test]
    fn distance_is_symmetric_and_non_negative() {
        let coords = vec![
            vec![2.35, 48.85],
            vec![2.36, 48.86],
            vec![-0.12, 51.5],
            vec![13.4, 52.52],
        ];
        let forward = distance(&coords);
        let mut reversed = coords.clone();
        reversed.reverse();
        let backward = distance(&reversed);
        assert!(forward > 0.0);
        assert!((forward - backward).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine((0.0, 0.0), (0.0, 1.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn altitude_component_is_ignored() {
        let flat = distance(&[vec![2.35, 48.85], vec![2.36, 48.86]]);
        let with_alt = distance(&[vec![2.35, 48.85, 100.0], vec![2.36, 48.86, 900.0]]);
        assert_eq!(flat, with_alt);
    }
}
