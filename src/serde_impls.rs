use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt::{self, Formatter};
use std::hash::Hash;
use std::marker::PhantomData;

use crate::{HashKey, HashMap, HashMapRef, HashSet, HashSetRef, Storage};

struct MapVisitor<K, V, S, P> {
    _marker: PhantomData<(S, P, fn() -> (K, V))>,
}

impl<K, V, S, P> Serialize for HashMapRef<'_, K, V, S, P>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
    S: HashKey,
    P: Storage<K, V>,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_map(self)
    }
}

impl<K, V, S, P> Serialize for HashMap<K, V, S, P>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
    S: HashKey,
    P: Storage<K, V>,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        self.pin().serialize(serializer)
    }
}

impl<'de, K, V, S, P> Deserialize<'de> for HashMap<K, V, S, P>
where
    K: Deserialize<'de> + Hash + Eq,
    V: Deserialize<'de>,
    S: Default + HashKey,
    P: Storage<K, V>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(MapVisitor {
            _marker: PhantomData,
        })
    }
}

impl<'de, K, V, S, P> Visitor<'de> for MapVisitor<K, V, S, P>
where
    K: Deserialize<'de> + Hash + Eq,
    V: Deserialize<'de>,
    S: Default + HashKey,
    P: Storage<K, V>,
{
    type Value = HashMap<K, V, S, P>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let values = match access.size_hint() {
            Some(size) => HashMap::with_capacity_and_hasher(size, S::default()),
            None => HashMap::default(),
        };

        {
            let values = values.pin();
            while let Some((key, value)) = access.next_entry()? {
                values.insert(key, value);
            }
        }

        Ok(values)
    }
}

struct SetVisitor<K, S, P> {
    _marker: PhantomData<(S, P, fn() -> K)>,
}

impl<K, S, P> Serialize for HashSetRef<'_, K, S, P>
where
    K: Serialize + Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_seq(self)
    }
}

impl<K, S, P> Serialize for HashSet<K, S, P>
where
    K: Serialize + Hash + Eq,
    S: HashKey,
    P: Storage<K, ()>,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        self.pin().serialize(serializer)
    }
}

impl<'de, K, S, P> Deserialize<'de> for HashSet<K, S, P>
where
    K: Deserialize<'de> + Hash + Eq,
    S: Default + HashKey,
    P: Storage<K, ()>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(SetVisitor {
            _marker: PhantomData,
        })
    }
}

impl<'de, K, S, P> Visitor<'de> for SetVisitor<K, S, P>
where
    K: Deserialize<'de> + Hash + Eq,
    S: Default + HashKey,
    P: Storage<K, ()>,
{
    type Value = HashSet<K, S, P>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a set")
    }

    fn visit_seq<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: SeqAccess<'de>,
    {
        let values = match access.size_hint() {
            Some(size) => HashSet::with_capacity_and_hasher(size, S::default()),
            None => HashSet::default(),
        };

        {
            let values = values.pin();
            while let Some(key) = access.next_element()? {
                values.insert(key);
            }
        }

        Ok(values)
    }
}
