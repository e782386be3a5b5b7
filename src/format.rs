/*!

The JBON byte format.

Everything is made of units. A unit is a lead-in byte, optionally followed by a size field and a
variant field, followed by the payload. All multi-byte integers, floats, sizes and variants are
little-endian.

# Lead-in Byte

The two high bits select the class of the unit:

```text
+----------+
| CCXXXXXX |
+----------+

CC = 00: Mixed
CC = 01: Tiny
CC = 10: String
CC = 11: Struct
```

## Mixed

| Lead-in     | Unit                                            | Payload     |
| --          | --                                              | --          |
| 0x00 - 0x0F | Local reference, index 0-15                     | 0           |
| 0x10 - 0x1F | Global reference, index 0-15                    | 0           |
| 0x20 - 0x23 | int8 / int16 / int32 / int64                    | 1/2/4/8     |
| 0x24 - 0x27 | float16 / float32 / float64 / float128          | 2/4/8/16    |
| 0x28        | Timestamp, signed 48-bit milliseconds           | 6           |
| 0x29        | Null                                            | 0           |
| 0x2A        | Undefined                                       | 0           |
| 0x2B / 0x2C | False / True                                    | 0           |
| 0x30 - 0x32 | Local reference, index minus 16                 | 1/2/4       |
| 0x33, 0x37  | Null reference                                  | 0           |
| 0x34 - 0x36 | Global reference, index minus 16                | 1/2/4       |

Every other mixed lead-in is reserved and fails to decode. A reader positioned outside of its
buffer reports the undefined lead-in.

## Tiny

```text
+----------+
| 01FVVVVV |
+----------+

F = 0: integer, F = 1: float
VVVVV = signed 5-bit value, -16 to 15
```

Only integral floats use the tiny form, and negative zero never does.

## String

```text
+----------+
| 10LLLLLL |
+----------+
```

- `L` from 0 to 60 is the payload length in bytes.
- `L` = 61: one more byte follows, holding the length minus 61 (lengths 61 to 315).
- `L` = 62: a 2-byte length follows.
- `L` = 63: a 4-byte length follows.

The payload is a sequence of code points and dictionary references:

```text
0XXXXXXX                    ASCII
10XXXXXX YYYYYYYY           14-bit value, code point minus 128
110XXXXX YYYYYYYY ZZZZZZZZ  21-bit code point, big-endian
111SSGVV + index            dictionary reference
```

For references, `G` selects the global dictionary, `VV` the width of the little-endian index
that follows (0: 1 byte, 1: 2 bytes, 2: 4 bytes, 3: reserved), and `SS` a separator appended
after the referenced string (0: none, 1: space, 2: underscore, 3: colon).

## Struct

```text
+----------+
| 11SSKKVV |
+----------+

SS = size field width: 0, 1, 2 or 4 bytes
KK = 00: VV selects the kind, 00 Array, 01 Map, 10 Dictionary, 11 reserved
KK = 01: Feature, VV = variant field width
KK = 10: Xyz, VV = variant field width
KK = 11: Custom, VV = variant field width
```

The size field counts the payload bytes only. A missing size field means an empty payload, and
a missing variant field means variant 0 where a variant is expected.

# Structures

- Array: one unit per value.
- Map: a reference to the key followed by the value, for each entry.
- Dictionary: the id (string or null), then one plain string per entry. Plain strings carry no
  references.
- Feature: the global dictionary id (string or null), the record id (string or null), the
  local dictionary, and one payload unit.
- Xyz: a fixed field sequence, chosen by the variant.

## Xyz Variants

| Variant | Fields |
| --      | --     |
| 0       | created_at, updated_at, author_ts (timestamps), txn, action, version (integers), puuid, uuid (string or null), app_id (string), author (string or null), grid (string) |
| 1       | op code (integer), id (string), uuid, grid (string or null) |
| 2       | global dictionary id (string or null), then one string per tag |

*/
