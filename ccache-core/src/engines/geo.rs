//! # Geo Engine
//!
//! Named points keyed by member. Distances are haversine on a
//! 6,371,000 m Earth; geohashes are the 11-character base-32 interleaved
//! encoding, longitude bit first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const GEOHASH_ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const GEOHASH_BITS: u32 = 55;
/// Meters per degree of latitude, used by the bounding-box test.
const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoBody {
    pub points: HashMap<String, GeoPoint>,
}

/// Distance units accepted by the geo commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl GeoUnit {
    pub fn parse(text: &str) -> CacheResult<GeoUnit> {
        match text.to_ascii_lowercase().as_str() {
            "m" => Ok(GeoUnit::Meters),
            "km" => Ok(GeoUnit::Kilometers),
            "mi" => Ok(GeoUnit::Miles),
            "ft" => Ok(GeoUnit::Feet),
            _ => Err(CacheError::other("unsupported unit provided. please use m, km, ft, mi")),
        }
    }

    pub fn meters(self) -> f64 {
        match self {
            GeoUnit::Meters => 1.0,
            GeoUnit::Kilometers => 1_000.0,
            GeoUnit::Miles => 1_609.34,
            GeoUnit::Feet => 0.3048,
        }
    }
}

/// Search origin.
#[derive(Debug, Clone)]
pub enum GeoFrom {
    Member(String),
    LonLat(f64, f64),
}

/// Search area: radius or box, both in meters.
#[derive(Debug, Clone, Copy)]
pub enum GeoBy {
    Radius(f64),
    Box { width: f64, height: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoSort {
    Asc,
    Desc,
}

/// One search match with its distance from the origin in meters.
#[derive(Debug, Clone)]
pub struct GeoHit {
    pub member: String,
    pub dist_m: f64,
    pub point: GeoPoint,
}

impl Db {
    /// GEOADD. Returns the number of new members; coordinates are validated
    /// before anything mutates.
    pub fn geoadd(&self, key: &str, items: &[(f64, f64, String)]) -> CacheResult<i64> {
        for (lon, lat, _) in items {
            if !(-180.0..=180.0).contains(lon) || !(-85.05112878..=85.05112878).contains(lat) {
                return Err(CacheError::other(format!(
                    "invalid longitude,latitude pair {},{}",
                    lon, lat
                )));
            }
        }

        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Geo)?;
        let body = self.keyspace.geo.load_or_store(key, GeoBody::default);
        let mut geo = body.write();
        let mut added = 0;
        for (lon, lat, member) in items {
            let point = GeoPoint {
                lon: *lon,
                lat: *lat,
            };
            if geo.points.insert(member.clone(), point).is_none() {
                added += 1;
            }
        }
        drop(geo);
        self.touch_write(key);
        Ok(added)
    }

    /// GEODIST in the requested unit; None when either member is missing.
    pub fn geodist(
        &self,
        key: &str,
        member_a: &str,
        member_b: &str,
        unit: GeoUnit,
    ) -> CacheResult<Option<f64>> {
        let Some(geo) = self.geo_snapshot(key)? else {
            return Ok(None);
        };
        let (Some(a), Some(b)) = (geo.points.get(member_a), geo.points.get(member_b)) else {
            return Ok(None);
        };
        Ok(Some(haversine_m(*a, *b) / unit.meters()))
    }

    /// GEOPOS: coordinates per member, None for unknown members.
    pub fn geopos(&self, key: &str, members: &[String]) -> CacheResult<Vec<Option<GeoPoint>>> {
        let geo = self.geo_snapshot(key)?.unwrap_or_default();
        Ok(members
            .iter()
            .map(|m| geo.points.get(m).copied())
            .collect())
    }

    /// GEOHASH: 11-character encodings per member.
    pub fn geohash(&self, key: &str, members: &[String]) -> CacheResult<Vec<Option<String>>> {
        let geo = self.geo_snapshot(key)?.unwrap_or_default();
        Ok(members
            .iter()
            .map(|m| geo.points.get(m).map(|p| encode_geohash(*p)))
            .collect())
    }

    /// GEOSEARCH. Distances in the hits are meters; the dispatch layer
    /// converts for WITHDIST.
    pub fn geosearch(
        &self,
        key: &str,
        from: &GeoFrom,
        by: GeoBy,
        sort: Option<GeoSort>,
        count: Option<usize>,
    ) -> CacheResult<Vec<GeoHit>> {
        let Some(geo) = self.geo_snapshot(key)? else {
            return Ok(Vec::new());
        };
        let origin = match from {
            GeoFrom::LonLat(lon, lat) => GeoPoint {
                lon: *lon,
                lat: *lat,
            },
            GeoFrom::Member(member) => *geo
                .points
                .get(member)
                .ok_or_else(|| CacheError::other("could not decode requested zset member"))?,
        };

        let mut hits: Vec<GeoHit> = geo
            .points
            .iter()
            .filter(|(_, point)| match by {
                GeoBy::Radius(radius_m) => haversine_m(origin, **point) <= radius_m,
                GeoBy::Box { width, height } => in_box(origin, **point, width, height),
            })
            .map(|(member, point)| GeoHit {
                member: member.clone(),
                dist_m: haversine_m(origin, *point),
                point: *point,
            })
            .collect();

        match sort {
            Some(GeoSort::Asc) => {
                hits.sort_by(|a, b| a.dist_m.total_cmp(&b.dist_m).then(a.member.cmp(&b.member)))
            }
            Some(GeoSort::Desc) => {
                hits.sort_by(|a, b| b.dist_m.total_cmp(&a.dist_m).then(a.member.cmp(&b.member)))
            }
            None => hits.sort_by(|a, b| a.member.cmp(&b.member)),
        }
        if let Some(count) = count {
            hits.truncate(count);
        }
        Ok(hits)
    }

    /// GEOSEARCHSTORE: stores the matches at `dest` as a geo value.
    pub fn geosearchstore(
        &self,
        dest: &str,
        src: &str,
        from: &GeoFrom,
        by: GeoBy,
        sort: Option<GeoSort>,
        count: Option<usize>,
    ) -> CacheResult<i64> {
        let hits = self.geosearch(src, from, by, sort, count)?;
        let len = hits.len() as i64;
        self.del(&[dest.to_string()]);
        if !hits.is_empty() {
            self.keyspace.claim(dest, ValueKind::Geo)?;
            let body = self.keyspace.geo.load_or_store(dest, GeoBody::default);
            let mut geo = body.write();
            for hit in hits {
                geo.points.insert(hit.member, hit.point);
            }
            drop(geo);
            self.touch_write(dest);
        }
        Ok(len)
    }

    fn geo_snapshot(&self, key: &str) -> CacheResult<Option<GeoBody>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Geo)? {
            return Ok(None);
        }
        Ok(self.keyspace.geo.load(key).map(|body| body.read().clone()))
    }
}

/// Great-circle distance in meters.
fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Axis-aligned box test: degree deltas against the box half-extents
/// converted from meters.
fn in_box(center: GeoPoint, point: GeoPoint, width_m: f64, height_m: f64) -> bool {
    let d_lat = (point.lat - center.lat).abs();
    let d_lon = (point.lon - center.lon).abs();
    let lat_limit = height_m / (2.0 * METERS_PER_DEGREE);
    let lon_limit = width_m / (2.0 * METERS_PER_DEGREE * center.lat.to_radians().cos());
    d_lat <= lat_limit && d_lon <= lon_limit
}

/// Interleaves longitude/latitude midpoint bits (longitude first) into the
/// base-32 alphabet until 55 bits are consumed.
fn encode_geohash(point: GeoPoint) -> String {
    let mut lon_range = (-180.0f64, 180.0f64);
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut bits: u64 = 0;

    for i in 0..GEOHASH_BITS {
        let even = i % 2 == 0;
        let range = if even { &mut lon_range } else { &mut lat_range };
        let value = if even { point.lon } else { point.lat };
        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if value >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
    }

    let mut out = String::with_capacity(11);
    for chunk in (0..11).rev() {
        let index = ((bits >> (chunk * 5)) & 0x1f) as usize;
        out.push(GEOHASH_ALPHABET[index] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SF: (f64, f64) = (-122.4194, 37.7749);
    const NYC: (f64, f64) = (-73.9857, 40.7484);

    fn seed(db: &Db) {
        db.geoadd(
            "g",
            &[
                (SF.0, SF.1, "sf".to_string()),
                (NYC.0, NYC.1, "nyc".to_string()),
            ],
        )
        .unwrap();
    }

    #[test]
    fn geoadd_validates_coordinates() {
        let db = Db::new();
        assert!(db.geoadd("g", &[(200.0, 10.0, "bad".to_string())]).is_err());
        assert!(db.geoadd("g", &[(10.0, 89.0, "bad".to_string())]).is_err());
        assert_eq!(db.geoadd("g", &[(10.0, 20.0, "ok".to_string())]).unwrap(), 1);
        // Re-adding the same member updates in place.
        assert_eq!(db.geoadd("g", &[(11.0, 21.0, "ok".to_string())]).unwrap(), 0);
    }

    #[test]
    fn geodist_sf_to_nyc() {
        let db = Db::new();
        seed(&db);
        let km = db
            .geodist("g", "sf", "nyc", GeoUnit::Kilometers)
            .unwrap()
            .unwrap();
        assert!((km - 4129.0).abs() < 10.0, "got {} km", km);

        let mi = db.geodist("g", "sf", "nyc", GeoUnit::Miles).unwrap().unwrap();
        assert!((mi - 2565.0).abs() < 10.0, "got {} mi", mi);
        assert_eq!(db.geodist("g", "sf", "nowhere", GeoUnit::Meters).unwrap(), None);
    }

    #[test]
    fn geopos_roundtrips() {
        let db = Db::new();
        seed(&db);
        let pos = db
            .geopos("g", &["sf".to_string(), "missing".to_string()])
            .unwrap();
        let sf = pos[0].unwrap();
        assert!((sf.lon - SF.0).abs() < 1e-9);
        assert!((sf.lat - SF.1).abs() < 1e-9);
        assert!(pos[1].is_none());
    }

    #[test]
    fn geohash_known_prefix() {
        let db = Db::new();
        seed(&db);
        let hashes = db.geohash("g", &["sf".to_string()]).unwrap();
        let hash = hashes[0].as_ref().unwrap();
        assert_eq!(hash.len(), 11);
        // San Francisco geohashes start with 9q8y.
        assert!(hash.starts_with("9q8y"), "got {}", hash);
    }

    #[test]
    fn radius_search_finds_nearby_only() {
        let db = Db::new();
        seed(&db);
        db.geoadd("g", &[(-122.2711, 37.8044, "oakland".to_string())])
            .unwrap();

        let hits = db
            .geosearch(
                "g",
                &GeoFrom::Member("sf".to_string()),
                GeoBy::Radius(50_000.0),
                Some(GeoSort::Asc),
                None,
            )
            .unwrap();
        let members: Vec<&str> = hits.iter().map(|h| h.member.as_str()).collect();
        assert_eq!(members, vec!["sf", "oakland"]);

        let all = db
            .geosearch(
                "g",
                &GeoFrom::LonLat(SF.0, SF.1),
                GeoBy::Radius(5_000_000.0),
                Some(GeoSort::Desc),
                Some(1),
            )
            .unwrap();
        assert_eq!(all[0].member, "nyc");
    }

    #[test]
    fn box_search() {
        let db = Db::new();
        db.geoadd(
            "g",
            &[
                (0.0, 0.0, "center".to_string()),
                (0.5, 0.0, "east".to_string()),
                (0.0, 2.0, "far_north".to_string()),
            ],
        )
        .unwrap();

        let hits = db
            .geosearch(
                "g",
                &GeoFrom::LonLat(0.0, 0.0),
                GeoBy::Box {
                    width: 250_000.0,
                    height: 100_000.0,
                },
                Some(GeoSort::Asc),
                None,
            )
            .unwrap();
        let members: Vec<&str> = hits.iter().map(|h| h.member.as_str()).collect();
        assert_eq!(members, vec!["center", "east"]);
    }

    #[test]
    fn searchstore_creates_geo_dest() {
        let db = Db::new();
        seed(&db);
        let stored = db
            .geosearchstore(
                "near",
                "g",
                &GeoFrom::Member("sf".to_string()),
                GeoBy::Radius(1_000.0),
                None,
                None,
            )
            .unwrap();
        assert_eq!(stored, 1);
        assert_eq!(
            db.geodist("near", "sf", "sf", GeoUnit::Meters).unwrap(),
            Some(0.0)
        );
    }
}
