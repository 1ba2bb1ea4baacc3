//! Seeded edits for the headless client
//!
//! Parses `x,y,z,#color` cube specs separated by `;`, as read from
//! `CUBERSE_CLIENT_ADD`.

use crate::error::ClientError;
use crate::protocol::events::ModelCube;
use crate::zone::{GridCoord, ZoneCoord};

/// Parse a `;`-separated list of `x,y,z,#color` specs into cubes of `zone`
pub fn parse_cube_specs(specs: &str, zone: ZoneCoord) -> Result<Vec<ModelCube>, ClientError> {
    specs
        .split(';')
        .map(str::trim)
        .filter(|spec| !spec.is_empty())
        .map(|spec| parse_cube_spec(spec, zone))
        .collect()
}

fn parse_cube_spec(spec: &str, zone: ZoneCoord) -> Result<ModelCube, ClientError> {
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
    let [x, y, z, color] = parts.as_slice() else {
        return Err(ClientError::InvalidCubeSpec(spec.to_string()));
    };

    let coord = |s: &str| {
        s.parse::<i32>()
            .map_err(|_| ClientError::InvalidCubeSpec(spec.to_string()))
    };
    if color.is_empty() {
        return Err(ClientError::InvalidCubeSpec(spec.to_string()));
    }

    Ok(ModelCube::new(
        zone,
        GridCoord::new(coord(x)?, coord(y)?, coord(z)?),
        *color,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_specs() {
        let cubes = parse_cube_specs("1,0,2,#ff0000; 3,4,5,#00ff00;", ZoneCoord::ORIGIN).unwrap();
        assert_eq!(
            cubes,
            vec![
                ModelCube::new(ZoneCoord::ORIGIN, GridCoord::new(1, 0, 2), "#ff0000"),
                ModelCube::new(ZoneCoord::ORIGIN, GridCoord::new(3, 4, 5), "#00ff00"),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_cube_specs("", ZoneCoord::ORIGIN).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_specs() {
        for bad in ["1,2,#fff", "a,0,0,#fff", "1,2,3,", "1,2,3,#fff,extra"] {
            let err = parse_cube_specs(bad, ZoneCoord::ORIGIN).unwrap_err();
            assert!(matches!(err, ClientError::InvalidCubeSpec(_)), "{}", bad);
        }
    }
}
