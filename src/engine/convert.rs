//! JSON <-> Lua value conversion over mlua's serde bridge.
//!
//! JSON `null` becomes the `null` light userdata, so object keys holding
//! null and holes in arrays survive a round trip. Arrays carry mlua's array
//! metatable, which keeps `[]` an array on the way back.

use mlua::{DeserializeOptions, Lua, LuaSerdeExt, Value as LVal};
use serde_json::Value;

pub(crate) fn json_to_lua<'lua>(lua: &'lua Lua, v: &Value) -> mlua::Result<LVal<'lua>> { lua.to_value(v) }

/// Cyclic tables are an error; functions and other non-data values are not.
pub(crate) fn lua_to_json<'lua>(lua: &'lua Lua, v: LVal<'lua>) -> mlua::Result<Value> {
    lua.from_value_with(v, DeserializeOptions::new().deny_unsupported_types(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(lua: &Lua, v: &Value) -> Value {
        lua_to_json(lua, json_to_lua(lua, v).unwrap()).unwrap()
    }

    #[test]
    fn documents_survive_the_bridge() {
        let lua = Lua::new();
        let doc = json!({"_id": "nonmember_valid", "value": 7, "is_ok": true, "tags": ["a", "b"], "nested": {"x": 1.5}});
        assert_eq!(round_trip(&lua, &doc), doc);
    }

    #[test]
    fn empty_arrays_holes_and_null_fields_are_kept() {
        let lua = Lua::new();
        let doc = json!({"tags": [], "holes": [1, null, 3], "gone": null, "deep": {"list": [[], {}]}});
        assert_eq!(round_trip(&lua, &doc), doc);
    }

    #[test]
    fn null_is_visible_to_lua() {
        let lua = Lua::new();
        lua.globals().set("null", lua.null()).unwrap();
        let doc = json_to_lua(&lua, &json!({"gone": null})).unwrap();
        lua.globals().set("doc", doc).unwrap();
        let (is_null, is_nil): (bool, bool) = lua.load("return doc.gone == null, doc.missing == nil").eval().unwrap();
        assert!(is_null && is_nil);
    }

    #[test]
    fn cyclic_tables_error_instead_of_overflowing() {
        let lua = Lua::new();
        let t: mlua::Table = lua.load("local t = {} t.self = t return t").eval().unwrap();
        assert!(lua_to_json(&lua, LVal::Table(t)).is_err());
    }
}
