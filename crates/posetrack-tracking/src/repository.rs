use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use glam::{DVec2, DVec3};

use crate::error::RepositoryError;
use crate::feature::FeaturePoint;

const HEADER: &str = "posetrack feature repository";

/// Write `features` in the line-oriented repository format.
///
/// Every numeric record is preceded by a label line. Features without a world
/// position are written at the origin.
pub fn save<W: Write>(features: &[FeaturePoint], mut writer: W) -> Result<(), RepositoryError> {
    writeln!(writer, "{HEADER}")?;
    writeln!(writer, "count")?;
    writeln!(writer, "{}", features.len())?;

    for (i, f) in features.iter().enumerate() {
        let p = f.world.unwrap_or_default();
        writeln!(writer, "point {i}")?;
        writeln!(writer, "position")?;
        writeln!(writer, "{} {} {}", p.x, p.y, p.z)?;
        writeln!(writer, "object")?;
        writeln!(writer, "{}", f.object_id)?;
        writeln!(writer, "color")?;
        let [r, g, b, a] = f.color;
        writeln!(writer, "{r} {g} {b} {a}")?;
        writeln!(writer, "size")?;
        writeln!(writer, "{}", f.size)?;
        writeln!(writer, "orientation")?;
        writeln!(writer, "{}", f.orientation)?;
        writeln!(writer, "distance")?;
        writeln!(writer, "{}", f.distance)?;
        writeln!(writer, "descriptor")?;
        write!(writer, "{}", f.descriptor.len())?;
        for v in &f.descriptor {
            write!(writer, " {v}")?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a repository file at `path`.
pub fn save_to_path(features: &[FeaturePoint], path: impl AsRef<Path>) -> Result<(), RepositoryError> {
    let file = File::create(path)?;
    save(features, BufWriter::new(file))
}

/// Line reader following the fixed layout written by [`save`].
///
/// Labels are skipped by position, whatever their content. Blank lines are ignored.
struct Records<R> {
    lines: std::io::Lines<R>,
}

impl<R: BufRead> Records<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    fn next_line(&mut self, what: &'static str) -> Result<String, RepositoryError> {
        for line in self.lines.by_ref() {
            let line = line?;
            if !line.trim().is_empty() {
                return Ok(line);
            }
        }
        Err(RepositoryError::UnexpectedEof(what))
    }

    fn skip(&mut self, label: &'static str) -> Result<(), RepositoryError> {
        self.next_line(label).map(drop)
    }

    /// Skip the label line of `field` and return the data line after it.
    fn record(&mut self, field: &'static str) -> Result<Fields, RepositoryError> {
        self.skip(field)?;
        let line = self.next_line(field)?;
        Ok(Fields {
            field,
            tokens: line
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into_iter(),
        })
    }
}

/// Tokens of one data line.
struct Fields {
    field: &'static str,
    tokens: std::vec::IntoIter<String>,
}

impl Fields {
    fn next<T: FromStr>(&mut self) -> Result<T, RepositoryError> {
        let field = self.field;
        let token = self
            .tokens
            .next()
            .ok_or(RepositoryError::UnexpectedEof(field))?;
        token
            .parse()
            .map_err(|_| RepositoryError::InvalidValue {
                field,
                value: token,
            })
    }

    fn finish(mut self) -> Result<(), RepositoryError> {
        match self.tokens.next() {
            Some(value) => Err(RepositoryError::InvalidValue {
                field: self.field,
                value,
            }),
            None => Ok(()),
        }
    }
}

/// Read a repository in the format written by [`save`].
///
/// The first line is the header and every data line follows one label line; labels
/// are skipped by position. Loaded points get their world `(X, Y)` as image position
/// and their order as repository index.
pub fn load<R: BufRead>(reader: R) -> Result<Vec<FeaturePoint>, RepositoryError> {
    let mut records = Records::new(reader);
    records.skip("header")?;
    let mut line = records.record("count")?;
    let count: usize = line.next()?;
    line.finish()?;

    let mut features = Vec::with_capacity(count.min(1 << 16));
    let mut dimension = None;
    for index in 0..count {
        records.skip("point")?;

        let mut line = records.record("position")?;
        let world = DVec3::new(line.next()?, line.next()?, line.next()?);
        line.finish()?;

        let mut line = records.record("object")?;
        let object_id = line.next()?;
        line.finish()?;

        let mut line = records.record("color")?;
        let color = [line.next()?, line.next()?, line.next()?, line.next()?];
        line.finish()?;

        let mut line = records.record("size")?;
        let size = line.next()?;
        line.finish()?;

        let mut line = records.record("orientation")?;
        let orientation = line.next()?;
        line.finish()?;

        let mut line = records.record("distance")?;
        let distance = line.next()?;
        line.finish()?;

        let mut line = records.record("descriptor")?;
        let len: usize = line.next()?;
        match dimension {
            None => dimension = Some(len),
            Some(expected) if expected != len => {
                return Err(RepositoryError::DescriptorDimension {
                    expected,
                    actual: len,
                })
            }
            Some(_) => {}
        }
        let descriptor = (0..len)
            .map(|_| line.next())
            .collect::<Result<Vec<f32>, _>>()?;
        line.finish()?;

        features.push(FeaturePoint {
            position: DVec2::new(world.x, world.y),
            world: Some(world),
            size,
            orientation,
            descriptor,
            outlier: false,
            index,
            object_id,
            color,
            distance,
        });
    }
    Ok(features)
}

/// Read a repository file at `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Vec<FeaturePoint>, RepositoryError> {
    let file = File::open(path)?;
    load(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FeaturePoint> {
        (0..3)
            .map(|i| FeaturePoint {
                position: DVec2::new(i as f64, 0.0),
                world: Some(DVec3::new(0.1 * i as f64, -0.25, 0.0)),
                size: 7.5,
                orientation: 0.3 * i as f64,
                descriptor: vec![i as f32, 0.125, -3.5],
                object_id: 2,
                color: [0.5, 0.25, 1.0, 1.0],
                distance: 0.75,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn save_then_load() -> Result<(), RepositoryError> {
        let mut buf = Vec::new();
        save(&sample(), &mut buf)?;
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with(HEADER));
        assert!(text.contains("\npoint 2\n"));

        let loaded = load(buf.as_slice())?;
        assert_eq!(loaded.len(), 3);
        for (i, (a, b)) in loaded.iter().zip(sample()).enumerate() {
            assert_eq!(a.index, i);
            assert_eq!(a.world, b.world);
            assert_eq!(a.position, b.world.unwrap_or_default().truncate());
            assert_eq!(a.descriptor, b.descriptor);
            assert_eq!(a.color, b.color);
            assert_eq!(a.object_id, 2);
            assert_eq!(a.orientation, b.orientation);
        }
        Ok(())
    }

    #[test]
    fn labels_are_skipped_by_position() -> Result<(), RepositoryError> {
        let text = "2 targets repository\n\
                    3 items follow\n1\n\
                    12 first point\n\
                    NaN means unmatched distance\n0.5 0.5 0\n\
                    inf\n4\n\
                    1e3\n1 1 1 1\n\
                    -\n2\n\
                    0\n0\n\
                    7 or so\n0.1\n\
                    2 values\n2 0.5 0.25\n";
        let loaded = load(text.as_bytes())?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].world, Some(DVec3::new(0.5, 0.5, 0.0)));
        assert_eq!(loaded[0].object_id, 4);
        assert_eq!(loaded[0].size, 2.0);
        assert_eq!(loaded[0].distance, 0.1);
        assert_eq!(loaded[0].descriptor, vec![0.5, 0.25]);
        Ok(())
    }

    #[test]
    fn truncated_and_invalid() {
        let err = load("header\ncount\n2\npoint 0\nposition\n0 0 0\n".as_bytes()).unwrap_err();
        assert!(matches!(err, RepositoryError::UnexpectedEof("object")));

        let err = load("header\ncount\n1\npoint 0\nposition\n0 0 0\nobject\n1.5\n".as_bytes())
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::InvalidValue { field: "object", .. }
        ));

        let err = load("header\ncount\n1\npoint 0\nposition\n0 0 0 9\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::InvalidValue { field: "position", ref value } if value == "9"
        ));
    }

    #[test]
    fn descriptor_dimension_is_fixed() -> Result<(), RepositoryError> {
        let mut features = sample();
        features[1].descriptor.push(1.0);
        let mut buf = Vec::new();
        save(&features, &mut buf)?;

        let err = load(buf.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::DescriptorDimension {
                expected: 3,
                actual: 4
            }
        ));
        Ok(())
    }
}
