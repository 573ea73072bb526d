/*
 * Tessera Chess Engine
 * Copyright (C) 2026 tessera developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

/// Aligns the wrapped value to a 32 byte boundary (SIMD register width).
#[derive(Clone, Copy)]
#[repr(align(32))]
pub struct A32<T>(pub T);

/// Aligns the wrapped value to a 64 byte boundary (cache line size).
#[derive(Clone, Copy)]
#[repr(align(64))]
pub struct A64<T>(pub T);
