//! Base/Source/Result lifecycle of an erosion target
//!
//! ```text
//! prepare_base ──► Base ──clone──► Source ──solver──► Result
//!                                   ▲                   │
//!                                   └─── commit ────────┘
//! ```

use tracing::{debug, info};

use super::cache::{Heightmap, MapCache, MapId};
use super::target::ErosionTarget;
use crate::error::{ErosionError, Result};
use crate::field::{Field, TextureManager};

/// Name given to freshly generated base and source maps
pub const BASE_MAP_NAME: &str = "Base map";

/// Derive the next layer name from the current one
///
/// If `name` ends in a number `n`, returns `default` with its trailing number
/// replaced by `n + 1`; otherwise returns `default` unchanged.
///
/// ```
/// use hydra_core::heightmap::increment_layer;
/// assert_eq!(increment_layer("Thermal 3", "Particle 1"), "Particle 4");
/// assert_eq!(increment_layer("Base map", "Mei 1"), "Mei 1");
/// ```
pub fn increment_layer(name: &str, default: &str) -> String {
    let Some(number) = trailing_number(name).and_then(|digits| digits.parse::<u64>().ok()) else {
        return default.to_owned();
    };
    match trailing_number(default) {
        Some(digits) => format!("{}{}", &default[..default.len() - digits.len()], number + 1),
        None => format!("{default} {}", number + 1),
    }
}

fn trailing_number(s: &str) -> Option<&str> {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some(&s[start..])
}

/// Ensure the target has a valid Base, regenerating Source alongside it
///
/// Returns `true` when Base was regenerated.
///
/// # Errors
///
/// `InvalidSource` when the target cannot produce a height field.
pub fn prepare_base(
    cache: &mut MapCache,
    manager: &TextureManager,
    target: &mut dyn ErosionTarget,
) -> Result<bool> {
    if cache.has_opt(target.maps().base) {
        return Ok(false);
    }
    regenerate(cache, manager, target, true)?;
    Ok(true)
}

/// Regenerate Base unconditionally
///
/// Source survives unless the previous Base was already invalid or Source
/// itself is gone.
pub fn recalculate_base(
    cache: &mut MapCache,
    manager: &TextureManager,
    target: &mut dyn ErosionTarget,
) -> Result<()> {
    let reload = !cache.has_opt(target.maps().base);
    regenerate(cache, manager, target, reload)
}

fn regenerate(
    cache: &mut MapCache,
    manager: &TextureManager,
    target: &mut dyn ErosionTarget,
    reload_source: bool,
) -> Result<()> {
    // Generate first so a failure leaves every slot untouched
    let field = target.height_field(manager)?;
    let source_field = if reload_source || !cache.has_opt(target.maps().source) {
        Some(manager.clone_field(&field)?)
    } else {
        None
    };

    info!(target = target.name(), "Generated base heightmap");
    cache.try_release_opt(target.maps().base);
    let base = cache.create(BASE_MAP_NAME, field, false, None);
    target.maps_mut().base = Some(base);

    if let Some(source_field) = source_field {
        cache.try_release_opt(target.maps().source);
        let source = cache.create(BASE_MAP_NAME, source_field, false, None);
        let maps = target.maps_mut();
        maps.source = Some(source);
        // A result computed from the old source is stale
        if let Some(result) = maps.result.take() {
            cache.try_release(result);
        }
    }
    Ok(())
}

fn lookup(cache: &mut MapCache, id: Option<MapId>, what: &str) -> Result<MapId> {
    let id = id.ok_or_else(|| ErosionError::invalid_source(format!("no {what} map")))?;
    if cache.get(id).is_some() {
        Ok(id)
    } else {
        Err(ErosionError::invalid_source(format!(
            "{what} map {id} was released"
        )))
    }
}

/// The target's Source map, resurrecting it if needed
pub fn source_map<'c>(cache: &'c mut MapCache, target: &dyn ErosionTarget) -> Result<&'c Heightmap> {
    let id = lookup(cache, target.maps().source, "source")?;
    cache
        .peek(id)
        .ok_or_else(|| ErosionError::invalid_source("source map vanished"))
}

/// The target's Result map if one exists, otherwise its Source map
pub fn result_or_source<'c>(
    cache: &'c mut MapCache,
    target: &dyn ErosionTarget,
) -> Result<&'c Heightmap> {
    let id = match target.maps().result {
        Some(result) if cache.has(result) => lookup(cache, Some(result), "result")?,
        _ => lookup(cache, target.maps().source, "source")?,
    };
    cache
        .peek(id)
        .ok_or_else(|| ErosionError::invalid_source("map vanished"))
}

/// Store `field` as the target's new Result, releasing the previous one
///
/// The map name is derived from the Source name with [`increment_layer`].
/// With `inherit_from_source` the new map inherits Source's `logarithmic` tag.
pub fn store_result(
    cache: &mut MapCache,
    target: &mut dyn ErosionTarget,
    default_name: &str,
    field: Field,
    inherit_from_source: bool,
) -> Result<MapId> {
    let source_id = lookup(cache, target.maps().source, "source")?;
    let source_name = cache
        .peek(source_id)
        .map(|map| map.name.clone())
        .unwrap_or_default();
    let name = increment_layer(&source_name, default_name);

    cache.try_release_opt(target.maps().result);
    let based_on = inherit_from_source.then_some(source_id);
    let id = cache.create(name, field, false, based_on);
    target.maps_mut().result = Some(id);
    debug!(target = target.name(), %id, "Stored result map");
    Ok(id)
}

/// Promote Result to Source, optionally replacing Base as well
///
/// When Result already is Source, Result is cleared and nothing else changes.
/// Without a Result this is a no-op.
pub fn commit_result_as_source(
    cache: &mut MapCache,
    manager: &TextureManager,
    target: &mut dyn ErosionTarget,
    also_base: bool,
) -> Result<()> {
    let maps = *target.maps();
    let Some(result) = maps.result else {
        return Ok(());
    };
    if maps.source == Some(result) {
        target.maps_mut().result = None;
        return Ok(());
    }
    lookup(cache, Some(result), "result")?;

    let base_field = if also_base {
        let map = cache
            .peek(result)
            .ok_or_else(|| ErosionError::invalid_source("result map vanished"))?;
        Some((map.name.clone(), manager.clone_field(&map.field)?))
    } else {
        None
    };

    cache.try_release_opt(maps.source);
    {
        let slots = target.maps_mut();
        slots.source = Some(result);
        slots.result = None;
    }

    if let Some((name, field)) = base_field {
        cache.try_release_opt(maps.base);
        let base = cache.create(name, field, false, None);
        target.maps_mut().base = Some(base);
    }
    info!(target = target.name(), also_base, "Committed result as source");
    Ok(())
}

/// `scale * (a - factor * b)` for two cached maps
pub fn scaled_difference(
    cache: &mut MapCache,
    manager: &TextureManager,
    a: MapId,
    b: MapId,
    factor: f32,
    scale: f32,
) -> Result<Field> {
    lookup(cache, Some(a), "minuend")?;
    lookup(cache, Some(b), "subtrahend")?;
    let (Some(ma), Some(mb)) = (cache.peek(a), cache.peek(b)) else {
        return Err(ErosionError::invalid_source("map vanished"));
    };
    manager.scaled_difference(&ma.field, &mb.field, factor, scale)
}

/// Displacement of the latest state relative to Base
///
/// The difference is rescaled by `org_scale / height_scale` so it is
/// expressed in the surface's own proportions.
pub fn displacement(
    cache: &mut MapCache,
    manager: &TextureManager,
    target: &dyn ErosionTarget,
) -> Result<Field> {
    let current = match target.maps().result {
        Some(result) if cache.has(result) => result,
        _ => lookup(cache, target.maps().source, "source")?,
    };
    let base = lookup(cache, target.maps().base, "base")?;
    let height_scale = target.settings().height_scale;
    let scale = if height_scale != 0.0 {
        target.org_scale() / height_scale
    } else {
        1.0
    };
    scaled_difference(cache, manager, current, base, 1.0, scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightmap::ImageTarget;
    use crate::image::ExternalImage;

    fn target() -> ImageTarget {
        let values: Vec<f32> = (0..16).map(|i| i as f32 / 16.0).collect();
        ImageTarget::new(ExternalImage::from_gray("terrain", 4, 4, &values).unwrap())
    }

    #[test]
    fn test_increment_layer() {
        assert_eq!(increment_layer("Thermal 3", "Particle 1"), "Particle 4");
        assert_eq!(increment_layer("Base map", "Thermal 1"), "Thermal 1");
        assert_eq!(increment_layer("Mei 9", "Mei 1"), "Mei 10");
        assert_eq!(increment_layer("Snow 2", "Snow"), "Snow 3");
    }

    #[test]
    fn test_prepare_base_creates_source_clone() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(4);
        let mut target = target();
        assert!(prepare_base(&mut cache, &manager, &mut target).unwrap());
        assert!(!prepare_base(&mut cache, &manager, &mut target).unwrap());

        let maps = *target.maps();
        assert_ne!(maps.base, maps.source);
        let base = cache.peek(maps.base.unwrap()).unwrap().field.as_slice().to_vec();
        let source = cache.peek(maps.source.unwrap()).unwrap().field.as_slice().to_vec();
        assert_eq!(base, source);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(4);
        let mut target = target();
        prepare_base(&mut cache, &manager, &mut target).unwrap();

        let field = manager.create_filled(4, 4, 1, 0.5).unwrap();
        let result = store_result(&mut cache, &mut target, "Thermal 1", field, false).unwrap();
        assert_eq!(cache.peek(result).unwrap().name, "Thermal 1");

        commit_result_as_source(&mut cache, &manager, &mut target, false).unwrap();
        let source = target.maps().source;
        assert_eq!(source, Some(result));
        assert_eq!(target.maps().result, None);

        commit_result_as_source(&mut cache, &manager, &mut target, false).unwrap();
        assert_eq!(target.maps().source, source);

        // Result aliasing Source only clears Result
        target.maps_mut().result = source;
        commit_result_as_source(&mut cache, &manager, &mut target, false).unwrap();
        assert_eq!(target.maps().source, source);
        assert_eq!(target.maps().result, None);
        assert!(cache.is_live(source.unwrap()));
    }

    #[test]
    fn test_commit_also_base() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(4);
        let mut target = target();
        prepare_base(&mut cache, &manager, &mut target).unwrap();
        let old_base = target.maps().base.unwrap();

        let field = manager.create_filled(4, 4, 1, 0.25).unwrap();
        store_result(&mut cache, &mut target, "Mei 1", field, false).unwrap();
        commit_result_as_source(&mut cache, &manager, &mut target, true).unwrap();

        let maps = *target.maps();
        assert_ne!(maps.base, Some(old_base));
        assert_ne!(maps.base, maps.source);
        let base = &cache.peek(maps.base.unwrap()).unwrap().field;
        assert!(base.as_slice().iter().all(|&v| v == 0.25));
        // Old base went to the graveyard
        assert!(cache.has(old_base));
        assert!(!cache.is_live(old_base));
    }

    #[test]
    fn test_result_name_follows_source() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(4);
        let mut target = target();
        prepare_base(&mut cache, &manager, &mut target).unwrap();

        let field = manager.create(4, 4, 1).unwrap();
        store_result(&mut cache, &mut target, "Thermal 1", field, false).unwrap();
        commit_result_as_source(&mut cache, &manager, &mut target, false).unwrap();
        let field = manager.create(4, 4, 1).unwrap();
        let id = store_result(&mut cache, &mut target, "Particle 1", field, false).unwrap();
        assert_eq!(cache.peek(id).unwrap().name, "Particle 2");
    }

    #[test]
    fn test_displacement_of_fresh_target_is_zero() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(4);
        let mut target = target();
        prepare_base(&mut cache, &manager, &mut target).unwrap();
        let disp = displacement(&mut cache, &manager, &target).unwrap();
        assert!(disp.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_missing_source_is_invalid() {
        let mut cache = MapCache::new(4);
        let target = target();
        assert!(matches!(
            source_map(&mut cache, &target),
            Err(ErosionError::InvalidSource(_))
        ));
    }
}
